//! Node daemon: load configuration, join the network, run until ctrl-c.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use storj_core::{KeyPair, Node, NodeConfig};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(Command::Keygen { out }) = &cli.command {
        let keys = KeyPair::generate();
        match out {
            Some(path) => {
                std::fs::write(path, format!("{}\n", keys.secret_hex()))
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("node id: {}", keys.node_id());
            }
            None => {
                println!("{}", keys.secret_hex());
                eprintln!("node id: {}", keys.node_id());
            }
        }
        return Ok(());
    }

    let config = load_config(&cli)?;
    let node = Node::new(config).context("building node")?;
    node.join().await.context("joining network")?;
    info!(contact = %node.contact(), "node is up, press ctrl-c to leave");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    node.leave().await.context("leaving network")?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => NodeConfig::default(),
    };

    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(datadir) = &cli.datadir {
        config.datadir = Some(datadir.clone());
    }
    if !cli.seeds.is_empty() {
        config.seeds = cli.seeds.clone();
    }
    if cli.no_farm {
        config.farm = false;
    }
    if let Some(keyfile) = &cli.keyfile {
        let secret = std::fs::read_to_string(keyfile)
            .with_context(|| format!("reading {}", keyfile.display()))?;
        config.secret_key = Some(secret.trim().to_string());
    }
    Ok(config)
}
