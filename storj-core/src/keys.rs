//! Node identity backed by a secp256k1 keypair
//!
//! Signatures use the Bitcoin signed-message construction (double SHA256
//! over a length-prefixed framed string) so a node's signatures map onto
//! the ecosystem's existing address scheme. The 65-byte recoverable compact
//! form travels base64-encoded; verification recovers the public key and
//! compares its RIPEMD160(SHA256(·)) hash against the claimed node id.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::{NodeError, Result};
use crate::types::NodeId;

const MESSAGE_PREFIX: &[u8] = b"\x18Bitcoin Signed Message:\n";

/// secp256k1 keypair that signs for and identifies this node.
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
    secp: Secp256k1<All>,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut rand::thread_rng());
        let public = PublicKey::from_secret_key(&secp, &secret);
        Self {
            secret,
            public,
            secp,
        }
    }

    /// Load a keypair from a 32-byte hex secret.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| NodeError::Storage(format!("invalid secret key hex: {}", e)))?;
        let secret = SecretKey::from_slice(&bytes)?;
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Ok(Self {
            secret,
            public,
            secp,
        })
    }

    /// Hex form of the secret key, for key files.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// RIPEMD160(SHA256(compressed public key)).
    pub fn node_id(&self) -> NodeId {
        NodeId::from_pubkey(&self.public.serialize())
    }

    /// Payment destination advertised in contracts this node farms.
    pub fn address(&self) -> String {
        self.node_id().to_hex()
    }

    /// Sign a message, returning the base64 65-byte recoverable signature.
    pub fn sign(&self, message: &[u8]) -> String {
        let digest = magic_hash(message);
        let msg = Message::from_digest(digest);
        let sig = self.secp.sign_ecdsa_recoverable(&msg, &self.secret);
        let (rec_id, compact) = sig.serialize_compact();
        let mut out = [0u8; 65];
        // Bitcoin compact header for compressed keys: 31 + recovery id.
        out[0] = 31 + rec_id.to_i32() as u8;
        out[1..].copy_from_slice(&compact);
        BASE64.encode(out)
    }

    /// Verify `signature` over `message` against an expected node id.
    pub fn verify(message: &[u8], signature: &str, expected: &NodeId) -> Result<PublicKey> {
        let public = recover_pubkey(message, signature)?;
        if NodeId::from_pubkey(&public.serialize()) != *expected {
            return Err(NodeError::NodeIdMismatch);
        }
        Ok(public)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.node_id())
    }
}

/// Recover the signing public key from a base64 compact signature.
pub fn recover_pubkey(message: &[u8], signature: &str) -> Result<PublicKey> {
    let raw = BASE64
        .decode(signature)
        .map_err(|_| NodeError::SignatureInvalid)?;
    if raw.len() != 65 {
        return Err(NodeError::SignatureInvalid);
    }
    let header = raw[0];
    if header < 27 {
        return Err(NodeError::SignatureInvalid);
    }
    let rec_id = RecoveryId::from_i32(((header - 27) & 0x03) as i32)?;
    let sig = RecoverableSignature::from_compact(&raw[1..], rec_id)?;
    let msg = Message::from_digest(magic_hash(message));
    let secp = Secp256k1::new();
    Ok(secp.recover_ecdsa(&msg, &sig)?)
}

/// Bitcoin magic-hash: double SHA256 over the length-prefixed framing.
fn magic_hash(message: &[u8]) -> [u8; 32] {
    let mut framed = Vec::with_capacity(MESSAGE_PREFIX.len() + 9 + message.len());
    framed.extend_from_slice(MESSAGE_PREFIX);
    framed.extend_from_slice(&varint(message.len() as u64));
    framed.extend_from_slice(message);
    let first = Sha256::digest(&framed);
    Sha256::digest(first).into()
}

/// Bitcoin variable-length integer encoding.
fn varint(n: u64) -> Vec<u8> {
    if n < 0xfd {
        vec![n as u8]
    } else if n <= 0xffff {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(n as u16).to_le_bytes());
        out
    } else if n <= 0xffff_ffff {
        let mut out = vec![0xfe];
        out.extend_from_slice(&(n as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xff];
        out.extend_from_slice(&n.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let keys = KeyPair::generate();
        let sig = keys.sign(b"abc1700000000000");
        let public = KeyPair::verify(b"abc1700000000000", &sig, &keys.node_id()).unwrap();
        assert_eq!(public, *keys.public_key());
    }

    #[test]
    fn test_verify_binds_node_id() {
        let keys = KeyPair::generate();
        let other = KeyPair::generate();
        let sig = keys.sign(b"message");
        let err = KeyPair::verify(b"message", &sig, &other.node_id()).unwrap_err();
        assert_eq!(err, NodeError::NodeIdMismatch);
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let keys = KeyPair::generate();
        let sig = keys.sign(b"original");
        // A different message recovers a different key, which no longer
        // hashes to the signer's node id.
        assert!(KeyPair::verify(b"tampered", &sig, &keys.node_id()).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage_signature() {
        let keys = KeyPair::generate();
        assert_eq!(
            KeyPair::verify(b"m", "not-base64!!", &keys.node_id()).unwrap_err(),
            NodeError::SignatureInvalid
        );
        let short = BASE64.encode([1u8; 10]);
        assert_eq!(
            KeyPair::verify(b"m", &short, &keys.node_id()).unwrap_err(),
            NodeError::SignatureInvalid
        );
    }

    #[test]
    fn test_secret_hex_round_trip() {
        let keys = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&keys.secret_hex()).unwrap();
        assert_eq!(restored.node_id(), keys.node_id());
    }

    #[test]
    fn test_varint_encoding() {
        assert_eq!(varint(0), vec![0]);
        assert_eq!(varint(0xfc), vec![0xfc]);
        assert_eq!(varint(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(varint(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_node_id_is_hash_of_compressed_pubkey() {
        let keys = KeyPair::generate();
        let expected = NodeId::from_pubkey(&keys.public_key().serialize());
        assert_eq!(keys.node_id(), expected);
        assert_eq!(keys.address(), expected.to_hex());
    }
}
