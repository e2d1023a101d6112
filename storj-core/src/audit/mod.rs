//! Merkle audit trees over stored shards
//!
//! When a renter stores a shard it pre-commits a batch of random
//! challenges. Each challenge's expected response is
//! hash160(challenge ‖ shard), and the tree leaves are the hashed
//! responses, so the farmer learns nothing it can answer with unless it
//! still holds the shard bytes. The farmer keeps the public half (root,
//! depth, leaves); the renter retains the raw challenges and spends them
//! one audit at a time.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::types::hash160;

pub mod verifier;

pub use verifier::{AuditProof, Verifier};

/// Bytes of entropy per challenge.
const CHALLENGE_BYTES: usize = 32;

/// Half of an audit tree the farmer stores alongside the shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAuditRecord {
    /// Merkle root, hex.
    pub root: String,
    /// Levels between a leaf and the root.
    pub depth: u32,
    /// All leaves (hashed challenge responses), padded to a power of two.
    pub leaves: Vec<String>,
}

/// Half of an audit tree the renter retains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateAuditRecord {
    /// Unused challenge pre-images, hex, consumed front to back.
    pub challenges: Vec<String>,
    pub root: String,
    pub depth: u32,
}

/// Freshly generated audit tree for one shard.
#[derive(Debug, Clone)]
pub struct AuditTree {
    challenges: Vec<String>,
    leaves: Vec<[u8; 20]>,
    root: [u8; 20],
    depth: u32,
}

impl AuditTree {
    /// Generate `audit_count` random challenges over `shard` and build the
    /// Merkle tree of their hashed responses.
    pub fn generate(shard: &[u8], audit_count: u32) -> Self {
        let mut rng = rand::thread_rng();
        let mut challenges = Vec::with_capacity(audit_count as usize);
        let mut leaves = Vec::with_capacity(audit_count as usize);
        for _ in 0..audit_count.max(1) {
            let mut challenge = [0u8; CHALLENGE_BYTES];
            rng.fill_bytes(&mut challenge);
            leaves.push(hash160(&challenge_response(&challenge, shard)));
            challenges.push(hex::encode(challenge));
        }
        pad_leaves(&mut leaves);
        let levels = build_levels(&leaves);
        let root = levels[levels.len() - 1][0];
        Self {
            challenges,
            depth: (levels.len() - 1) as u32,
            leaves,
            root,
        }
    }

    pub fn public_record(&self) -> PublicAuditRecord {
        PublicAuditRecord {
            root: hex::encode(self.root),
            depth: self.depth,
            leaves: self.leaves.iter().map(hex::encode).collect(),
        }
    }

    pub fn private_record(&self) -> PrivateAuditRecord {
        PrivateAuditRecord {
            challenges: self.challenges.clone(),
            root: hex::encode(self.root),
            depth: self.depth,
        }
    }
}

/// Expected audit response: hash160(challenge ‖ shard).
pub fn challenge_response(challenge: &[u8], shard: &[u8]) -> [u8; 20] {
    let mut buf = Vec::with_capacity(challenge.len() + shard.len());
    buf.extend_from_slice(challenge);
    buf.extend_from_slice(shard);
    hash160(&buf)
}

/// Farmer side: answer `challenge` for a shard it still holds, producing
/// the response pre-image and the Merkle branch to the committed root.
pub fn prove(shard: &[u8], challenge_hex: &str, record: &PublicAuditRecord) -> Result<AuditProof> {
    let challenge = decode_hex(challenge_hex)?;
    let response = challenge_response(&challenge, shard);
    let leaf = hash160(&response);

    let leaves = record
        .leaves
        .iter()
        .map(|l| decode_hex20(l))
        .collect::<Result<Vec<_>>>()?;
    let index = leaves
        .iter()
        .position(|l| *l == leaf)
        .ok_or_else(|| NodeError::ContractRejected("challenge not in audit tree".into()))?;

    let levels = build_levels(&leaves);
    let mut branch = Vec::with_capacity(levels.len() - 1);
    let mut cursor = index;
    for level in &levels[..levels.len() - 1] {
        let sibling = if cursor % 2 == 0 { cursor + 1 } else { cursor - 1 };
        branch.push(hex::encode(level[sibling]));
        cursor /= 2;
    }

    Ok(AuditProof {
        leaf_index: index as u32,
        response: hex::encode(response),
        branch,
    })
}

/// Pad to the next power of two with the hash of the empty response.
fn pad_leaves(leaves: &mut Vec<[u8; 20]>) {
    let target = leaves.len().next_power_of_two();
    let filler = hash160(&hash160(&[]));
    while leaves.len() < target {
        leaves.push(filler);
    }
}

/// Bottom-up levels of the tree; `levels[0]` are the leaves, the last
/// level is the single root.
fn build_levels(leaves: &[[u8; 20]]) -> Vec<Vec<[u8; 20]>> {
    let mut levels = vec![leaves.to_vec()];
    while levels[levels.len() - 1].len() > 1 {
        let prev = &levels[levels.len() - 1];
        let mut next = Vec::with_capacity(prev.len() / 2);
        for pair in prev.chunks(2) {
            let mut buf = [0u8; 40];
            buf[..20].copy_from_slice(&pair[0]);
            buf[20..].copy_from_slice(&pair[1]);
            next.push(hash160(&buf));
        }
        levels.push(next);
    }
    levels
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| NodeError::BadResponse(format!("invalid hex: {}", e)))
}

pub(crate) fn decode_hex20(s: &str) -> Result<[u8; 20]> {
    let bytes = decode_hex(s)?;
    bytes
        .try_into()
        .map_err(|_| NodeError::BadResponse("expected a 20-byte hash".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_shape_for_default_audit_count() {
        let tree = AuditTree::generate(b"shard bytes", 12);
        let public = tree.public_record();
        // 12 challenges pad to 16 leaves, four levels to the root.
        assert_eq!(public.leaves.len(), 16);
        assert_eq!(public.depth, 4);
        assert_eq!(tree.private_record().challenges.len(), 12);
        assert_eq!(tree.private_record().root, public.root);
    }

    #[test]
    fn test_single_challenge_tree() {
        let tree = AuditTree::generate(b"shard", 1);
        let public = tree.public_record();
        assert_eq!(public.leaves.len(), 1);
        assert_eq!(public.depth, 0);
        assert_eq!(public.root, public.leaves[0]);
    }

    #[test]
    fn test_every_challenge_proves_against_root(){
        let shard = b"the quick brown fox";
        let tree = AuditTree::generate(shard, 5);
        let public = tree.public_record();
        let verifier = Verifier::new(&tree.private_record());
        for challenge in &tree.private_record().challenges {
            let proof = prove(shard, challenge, &public).unwrap();
            assert!(verifier.verify(&proof));
        }
    }

    #[test]
    fn test_prove_fails_without_shard_bytes() {
        let tree = AuditTree::generate(b"original shard", 4);
        let public = tree.public_record();
        let challenge = &tree.private_record().challenges[0];
        // Different bytes hash to a response whose leaf is not committed.
        assert!(prove(b"some other bytes", challenge, &public).is_err());
    }

    #[test]
    fn test_unknown_challenge_rejected() {
        let tree = AuditTree::generate(b"shard", 4);
        let public = tree.public_record();
        let foreign = hex::encode([9u8; 32]);
        assert!(prove(b"shard", &foreign, &public).is_err());
    }
}
