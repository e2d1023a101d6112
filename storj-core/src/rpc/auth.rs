//! Message authentication hooks
//!
//! Outbound messages get a millisecond nonce and a signature over
//! `message id ‖ decimal nonce` attached inside `params` (requests) or
//! `result` (responses). Inbound messages are checked for nonce freshness,
//! replay, and that the recovered public key hashes to the sender's
//! claimed node id. Inbound failures are counted and the message is
//! dropped without a reply.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use secp256k1::PublicKey;
use serde_json::Value;
use tracing::warn;

use crate::error::{NodeError, Result};
use crate::keys::KeyPair;
use crate::metrics::NodeMetrics;
use crate::rpc::{RpcRequest, RpcResponse, NONCE_FIELD, SIGNATURE_FIELD};
use crate::types::{now_millis, Contact, NodeId};

/// Public keys cached after a successful verification.
const PUBKEY_CACHE_CAP: usize = 512;
/// Recently accepted signatures, kept to reject replays inside the
/// freshness window.
const REPLAY_CACHE_CAP: usize = 4096;

pub struct MessageAuth {
    keys: Arc<KeyPair>,
    nonce_expire_ms: u64,
    pubkeys: Mutex<LruCache<NodeId, PublicKey>>,
    seen_signatures: Mutex<LruCache<String, ()>>,
    metrics: Arc<NodeMetrics>,
}

impl MessageAuth {
    pub fn new(keys: Arc<KeyPair>, nonce_expire_ms: u64, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            keys,
            nonce_expire_ms,
            pubkeys: Mutex::new(LruCache::new(
                NonZeroUsize::new(PUBKEY_CACHE_CAP).expect("cache capacity is nonzero"),
            )),
            seen_signatures: Mutex::new(LruCache::new(
                NonZeroUsize::new(REPLAY_CACHE_CAP).expect("cache capacity is nonzero"),
            )),
            metrics,
        }
    }

    /// Cached public key for a peer, if one has verified before.
    pub fn cached_pubkey(&self, node_id: &NodeId) -> Option<PublicKey> {
        self.pubkeys.lock().get(node_id).copied()
    }

    /// Sign hook for outbound requests.
    pub fn sign_request(&self, request: &mut RpcRequest) -> Result<()> {
        let nonce = now_millis();
        let signature = self.keys.sign(signing_target(&request.id, nonce).as_bytes());
        attach(&mut request.params, nonce, signature)
    }

    /// Sign hook for outbound responses. Error replies carry no result
    /// object and travel unsigned; requesters treat them as untrusted.
    pub fn sign_response(&self, response: &mut RpcResponse) -> Result<()> {
        let Some(result) = response.result.as_mut() else {
            return Ok(());
        };
        let nonce = now_millis();
        let signature = self.keys.sign(signing_target(&response.id, nonce).as_bytes());
        attach(result, nonce, signature)
    }

    /// Verify hook for inbound requests. Strips the reserved fields from
    /// `params` so the typed decode sees only the method schema.
    pub fn verify_request(&self, request: &mut RpcRequest, sender: &Contact) -> Result<()> {
        let id = request.id.clone();
        self.verify_envelope(&id, &mut request.params, sender)
            .inspect_err(|e| {
                NodeMetrics::incr(&self.metrics.auth_failures);
                warn!(peer = %sender.node_id, error = %e, "dropping unauthenticated request");
            })
    }

    /// Verify hook for inbound responses, checked against the contact the
    /// request was sent to.
    pub fn verify_response(&self, response: &mut RpcResponse, sender: &Contact) -> Result<()> {
        let id = response.id.clone();
        let Some(result) = response.result.as_mut() else {
            // Unsigned error reply; the caller maps it without trusting it.
            return Ok(());
        };
        self.verify_envelope(&id, result, sender).inspect_err(|e| {
            NodeMetrics::incr(&self.metrics.auth_failures);
            warn!(peer = %sender.node_id, error = %e, "dropping unauthenticated response");
        })
    }

    fn verify_envelope(&self, id: &str, body: &mut Value, sender: &Contact) -> Result<()> {
        let object = body
            .as_object_mut()
            .ok_or_else(|| NodeError::BadResponse("message body is not an object".into()))?;
        let nonce = object
            .remove(NONCE_FIELD)
            .and_then(|v| v.as_u64())
            .ok_or(NodeError::SignatureInvalid)?;
        let signature = object
            .remove(SIGNATURE_FIELD)
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or(NodeError::SignatureInvalid)?;

        let now = now_millis();
        if now > nonce.saturating_add(self.nonce_expire_ms) {
            return Err(NodeError::NonceExpired);
        }
        if self.seen_signatures.lock().contains(&signature) {
            return Err(NodeError::NonceExpired);
        }

        let target = signing_target(id, nonce);
        let public = KeyPair::verify(target.as_bytes(), &signature, &sender.node_id)?;

        self.seen_signatures.lock().put(signature, ());
        self.pubkeys.lock().put(sender.node_id, public);
        Ok(())
    }
}

impl std::fmt::Debug for MessageAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageAuth({})", self.keys.node_id())
    }
}

/// UTF-8 signing target: message id followed by the decimal nonce.
fn signing_target(id: &str, nonce: u64) -> String {
    format!("{}{}", id, nonce)
}

fn attach(body: &mut Value, nonce: u64, signature: String) -> Result<()> {
    let object = body
        .as_object_mut()
        .ok_or_else(|| NodeError::BadResponse("message body is not an object".into()))?;
    object.insert(NONCE_FIELD.into(), Value::from(nonce));
    object.insert(SIGNATURE_FIELD.into(), Value::from(signature));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Method, PingParams};

    fn auth_for(keys: Arc<KeyPair>) -> MessageAuth {
        MessageAuth::new(keys, 15_000, Arc::new(NodeMetrics::new()))
    }

    fn contact_for(keys: &KeyPair) -> Contact {
        Contact::new("127.0.0.1", 4000, keys.node_id())
    }

    fn ping_request(sender: &Contact) -> RpcRequest {
        RpcRequest::new(
            Method::Ping,
            &PingParams {
                contact: sender.clone(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_request_sign_verify_round_trip() {
        let keys = Arc::new(KeyPair::generate());
        let sender = contact_for(&keys);
        let signer = auth_for(keys.clone());
        let receiver = auth_for(Arc::new(KeyPair::generate()));

        let mut request = ping_request(&sender);
        signer.sign_request(&mut request).unwrap();
        assert!(request.params.get(NONCE_FIELD).is_some());
        assert!(request.params.get(SIGNATURE_FIELD).is_some());

        receiver.verify_request(&mut request, &sender).unwrap();
        // Reserved fields are stripped so the typed decode succeeds.
        assert!(request.params.get(NONCE_FIELD).is_none());
        request.typed_params::<PingParams>().unwrap();
        // Pubkey cache is populated after the first verification.
        assert_eq!(
            receiver.cached_pubkey(&sender.node_id),
            Some(*keys.public_key())
        );
    }

    #[test]
    fn test_stale_nonce_rejected() {
        let keys = Arc::new(KeyPair::generate());
        let sender = contact_for(&keys);
        let receiver = auth_for(Arc::new(KeyPair::generate()));

        let mut request = ping_request(&sender);
        let stale = now_millis() - 20_000;
        let signature = keys.sign(signing_target(&request.id, stale).as_bytes());
        attach(&mut request.params, stale, signature).unwrap();

        assert_eq!(
            receiver.verify_request(&mut request, &sender).unwrap_err(),
            NodeError::NonceExpired
        );
        assert_eq!(receiver.metrics.auth_failures.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn test_replayed_message_rejected() {
        let keys = Arc::new(KeyPair::generate());
        let sender = contact_for(&keys);
        let signer = auth_for(keys);
        let receiver = auth_for(Arc::new(KeyPair::generate()));

        let mut request = ping_request(&sender);
        signer.sign_request(&mut request).unwrap();
        let replay = request.clone();

        receiver.verify_request(&mut request, &sender).unwrap();
        let mut replay = replay;
        assert_eq!(
            receiver.verify_request(&mut replay, &sender).unwrap_err(),
            NodeError::NonceExpired
        );
    }

    #[test]
    fn test_wrong_identity_rejected() {
        let signer_keys = Arc::new(KeyPair::generate());
        let claimed = KeyPair::generate();
        // Signed with one key while claiming another identity.
        let sender = contact_for(&claimed);
        let signer = auth_for(signer_keys);
        let receiver = auth_for(Arc::new(KeyPair::generate()));

        let mut request = ping_request(&sender);
        signer.sign_request(&mut request).unwrap();
        assert_eq!(
            receiver.verify_request(&mut request, &sender).unwrap_err(),
            NodeError::NodeIdMismatch
        );
    }

    #[test]
    fn test_response_sign_verify_round_trip() {
        let keys = Arc::new(KeyPair::generate());
        let sender = contact_for(&keys);
        let signer = auth_for(keys);
        let receiver = auth_for(Arc::new(KeyPair::generate()));

        let mut response = RpcResponse::success("req-1", &crate::rpc::Ack {}).unwrap();
        signer.sign_response(&mut response).unwrap();
        receiver.verify_response(&mut response, &sender).unwrap();
    }

    #[test]
    fn test_missing_envelope_fields_rejected() {
        let keys = Arc::new(KeyPair::generate());
        let sender = contact_for(&keys);
        let receiver = auth_for(Arc::new(KeyPair::generate()));

        let mut request = ping_request(&sender);
        assert_eq!(
            receiver.verify_request(&mut request, &sender).unwrap_err(),
            NodeError::SignatureInvalid
        );
    }
}
