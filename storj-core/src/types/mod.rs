//! Core identifier types for the shard storage network
//!
//! Node identifiers and shard addresses share the same 20-byte form:
//! RIPEMD160(SHA256(bytes)). Node IDs hash the compressed secp256k1 public
//! key, shard hashes the shard contents. Both are hex-encoded on the wire.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ripemd::Ripemd160;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub mod contact;

pub use contact::Contact;

/// Compute RIPEMD160(SHA256(data)), the network's 20-byte address form.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn parse_hex20(s: &str) -> Result<[u8; 20], String> {
    let bytes = hex::decode(s).map_err(|e| format!("invalid hex: {}", e))?;
    if bytes.len() != 20 {
        return Err(format!("expected 20 bytes, got {}", bytes.len()));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// 20-byte node identifier derived from a secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 20]);

impl NodeId {
    /// Derive a node ID from a compressed public key.
    pub fn from_pubkey(compressed: &[u8]) -> Self {
        Self(hash160(compressed))
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        parse_hex20(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// XOR distance to another node ID, used for overlay routing.
    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

/// 20-byte content address of a shard: RIPEMD160(SHA256(shard bytes)).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardHash([u8; 20]);

impl ShardHash {
    /// Address of the given shard contents.
    pub fn of(data: &[u8]) -> Self {
        Self(hash160(data))
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        parse_hex20(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ShardHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ShardHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardHash({})", self.to_hex())
    }
}

macro_rules! hex_serde {
    ($ty:ident, $expecting:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct HexVisitor;

                impl<'de> Visitor<'de> for HexVisitor {
                    type Value = $ty;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str($expecting)
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        $ty::from_hex(v).map_err(E::custom)
                    }
                }

                deserializer.deserialize_str(HexVisitor)
            }
        }
    };
}

hex_serde!(NodeId, "a 40-character hex node id");
hex_serde!(ShardHash, "a 40-character hex shard hash");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash160_is_twenty_bytes() {
        let h = hash160(b"hello");
        assert_eq!(h.len(), 20);
        // Deterministic for identical input
        assert_eq!(h, hash160(b"hello"));
        assert_ne!(h, hash160(b"hello!"));
    }

    #[test]
    fn test_node_id_hex_round_trip() {
        let id = NodeId::from_bytes([0xabu8; 20]);
        let parsed = NodeId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_node_id_rejects_bad_hex() {
        assert!(NodeId::from_hex("zz").is_err());
        assert!(NodeId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_shard_hash_matches_hash160() {
        let data = b"shard contents";
        assert_eq!(*ShardHash::of(data).as_bytes(), hash160(data));
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = NodeId::from_bytes([1u8; 20]);
        let b = NodeId::from_bytes([2u8; 20]);
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), [0u8; 20]);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = NodeId::from_bytes([7u8; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
