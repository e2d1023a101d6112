//! Typed JSON-RPC message schema
//!
//! Every message is a JSON-RPC 2.0 request or response. Params and results
//! decode into per-method structs that reject unknown fields; the only
//! exception is the reserved `__nonce`/`__signature` pair, which the
//! authentication hooks strip before the typed decode runs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::audit::{AuditProof, PublicAuditRecord};
use crate::contract::Contract;
use crate::error::{NodeError, Result};
use crate::types::{Contact, NodeId, ShardHash};

pub mod auth;

pub use auth::MessageAuth;

pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved envelope field carrying the freshness nonce.
pub const NONCE_FIELD: &str = "__nonce";
/// Reserved envelope field carrying the sender's signature.
pub const SIGNATURE_FIELD: &str = "__signature";

/// Application-level error code used in error replies.
pub const ERROR_CODE_APP: i64 = -32000;
/// Invalid params error code.
pub const ERROR_CODE_PARAMS: i64 = -32602;

/// RPC methods spoken by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Ping,
    FindNode,
    Publish,
    Offer,
    Consign,
    Retrieve,
    Audit,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Ping => "PING",
            Method::FindNode => "FIND_NODE",
            Method::Publish => "PUBLISH",
            Method::Offer => "OFFER",
            Method::Consign => "CONSIGN",
            Method::Retrieve => "RETRIEVE",
            Method::Audit => "AUDIT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PING" => Some(Method::Ping),
            "FIND_NODE" => Some(Method::FindNode),
            "PUBLISH" => Some(Method::Publish),
            "OFFER" => Some(Method::Offer),
            "CONSIGN" => Some(Method::Consign),
            "RETRIEVE" => Some(Method::Retrieve),
            "AUDIT" => Some(Method::Audit),
            _ => None,
        }
    }
}

/// Signed JSON-RPC request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    /// Build a request with a fresh uuid message id.
    pub fn new<P: Serialize>(method: Method, params: &P) -> Result<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Uuid::new_v4().to_string(),
            method: method.as_str().into(),
            params: serde_json::to_value(params)?,
        })
    }

    pub fn method(&self) -> Option<Method> {
        Method::from_str(&self.method)
    }

    /// Decode the params into a typed struct, rejecting unknown fields.
    /// The reserved envelope fields must already be stripped.
    pub fn typed_params<P: DeserializeOwned>(&self) -> Result<P> {
        Ok(serde_json::from_value(self.params.clone())?)
    }

    /// The sender contact every method carries in its params, read before
    /// authentication so the verify hook knows which identity to check.
    pub fn sender_contact(&self) -> Result<Contact> {
        let contact = self
            .params
            .get("contact")
            .ok_or_else(|| NodeError::BadResponse("params missing contact".into()))?;
        Ok(serde_json::from_value(contact.clone())?)
    }
}

/// Signed JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    pub fn success<R: Serialize>(id: &str, result: &R) -> Result<Self> {
        let value = serde_json::to_value(result)?;
        // The sign hook needs an object to attach the envelope fields to.
        let value = match value {
            Value::Object(map) => Value::Object(map),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                Value::Object(map)
            }
        };
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            result: Some(value),
            error: None,
        })
    }

    pub fn failure(id: &str, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
            }),
        }
    }

    /// Decode the result into a typed struct, rejecting unknown fields.
    /// The reserved envelope fields must already be stripped.
    pub fn typed_result<R: DeserializeOwned>(&self) -> Result<R> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| NodeError::BadResponse("response missing result".into()))?;
        Ok(serde_json::from_value(result.clone())?)
    }
}

// Per-method schemas.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PingParams {
    pub contact: Contact,
}

/// Empty acknowledgement body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ack {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindNodeParams {
    pub key: NodeId,
    pub contact: Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindNodeResult {
    pub nodes: Vec<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishParams {
    pub topic: String,
    pub publication_id: String,
    pub ttl: u32,
    pub contents: Value,
    pub contact: Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfferParams {
    pub contract: Contract,
    pub contact: Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfferResult {
    pub contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsignParams {
    pub data_hash: ShardHash,
    /// Shard bytes, hex encoded.
    pub data_shard: String,
    pub audit_tree: PublicAuditRecord,
    pub contact: Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsignResult {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrieveParams {
    pub data_hash: ShardHash,
    pub contact: Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrieveResult {
    /// Shard bytes, hex encoded.
    pub data_shard: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditParams {
    pub data_hash: ShardHash,
    /// Challenge pre-image, hex encoded.
    pub challenge: String,
    pub contact: Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditResult {
    pub proof: AuditProof,
}
