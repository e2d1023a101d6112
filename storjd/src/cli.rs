//! Command line arguments

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "storjd", about = "Shard storage network node", version)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// RPC bind address, overriding the config file.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Data directory, overriding the config file.
    #[arg(long)]
    pub datadir: Option<PathBuf>,

    /// Seed contact URI (repeatable): storj://host:port/<nodeIdHex>
    #[arg(long = "seed")]
    pub seeds: Vec<String>,

    /// Do not offer storage for published contracts.
    #[arg(long)]
    pub no_farm: bool,

    /// Hex secret key file to load the node identity from.
    #[arg(long)]
    pub keyfile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a fresh node secret key.
    Keygen {
        /// Write the hex secret to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}
