//! Error kinds surfaced by node operations
//!
//! Authentication failures are dropped silently on the inbound path; every
//! other kind propagates to the caller of the outer operation. Nothing in
//! the node panics on a peer-supplied input.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// `join` called on a node that is already open.
    #[error("node is already open")]
    AlreadyOpen,

    /// Operation requires an open node.
    #[error("node is not open")]
    NotOpen,

    /// Socket or HTTP level failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Signature did not verify or could not be decoded.
    #[error("invalid message signature")]
    SignatureInvalid,

    /// Message nonce fell outside the acceptance window or replayed.
    #[error("message nonce expired")]
    NonceExpired,

    /// Recovered public key does not hash to the claimed node id.
    #[error("sender node id mismatch")]
    NodeIdMismatch,

    /// Iterative lookup returned no node with the requested id.
    #[error("no peer found for {0}")]
    PeerNotFound(String),

    /// Counterparty returned a result we could not decode or that fails
    /// an integrity check.
    #[error("malformed response: {0}")]
    BadResponse(String),

    /// Counterparty refused the operation or returned an error object.
    #[error("contract rejected: {0}")]
    ContractRejected(String),

    /// Audit attempted with no remaining pre-image challenges.
    #[error("audit challenges exhausted")]
    ChallengesExhausted,

    /// A store for this shard is already waiting on an offer.
    #[error("an offer is already pending for this shard")]
    OfferPending,

    /// Shard or item backend failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::BadResponse(err.to_string())
    }
}

impl From<secp256k1::Error> for NodeError {
    fn from(_: secp256k1::Error) -> Self {
        NodeError::SignatureInvalid
    }
}
