//! Renter-side verification of audit proofs

use serde::{Deserialize, Serialize};

use crate::audit::{decode_hex20, PrivateAuditRecord};
use crate::types::hash160;

/// Farmer's answer to an audit challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditProof {
    /// Position of the response's leaf in the committed tree.
    pub leaf_index: u32,
    /// hash160(challenge ‖ shard), hex. Pre-image of the committed leaf.
    pub response: String,
    /// Sibling hashes from the leaf to the root, hex.
    pub branch: Vec<String>,
}

/// Checks audit proofs against the root and depth a renter committed to
/// when the shard was stored.
#[derive(Debug, Clone)]
pub struct Verifier {
    root: String,
    depth: u32,
}

impl Verifier {
    pub fn new(record: &PrivateAuditRecord) -> Self {
        Self {
            root: record.root.clone(),
            depth: record.depth,
        }
    }

    /// True when the proof's response folds up to the committed root
    /// through a branch of exactly the committed depth.
    pub fn verify(&self, proof: &AuditProof) -> bool {
        if proof.branch.len() as u32 != self.depth {
            return false;
        }
        let Ok(response) = decode_hex20(&proof.response) else {
            return false;
        };
        let Ok(root) = decode_hex20(&self.root) else {
            return false;
        };

        let mut hash = hash160(&response);
        let mut cursor = proof.leaf_index as usize;
        for sibling_hex in &proof.branch {
            let Ok(sibling) = decode_hex20(sibling_hex) else {
                return false;
            };
            let mut buf = [0u8; 40];
            if cursor % 2 == 0 {
                buf[..20].copy_from_slice(&hash);
                buf[20..].copy_from_slice(&sibling);
            } else {
                buf[..20].copy_from_slice(&sibling);
                buf[20..].copy_from_slice(&hash);
            }
            hash = hash160(&buf);
            cursor /= 2;
        }
        hash == root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{prove, AuditTree};

    #[test]
    fn test_valid_proof_verifies() {
        let shard = b"stored shard bytes";
        let tree = AuditTree::generate(shard, 12);
        let private = tree.private_record();
        let proof = prove(shard, &private.challenges[0], &tree.public_record()).unwrap();
        assert!(Verifier::new(&private).verify(&proof));
    }

    #[test]
    fn test_tampered_response_fails() {
        let shard = b"stored shard bytes";
        let tree = AuditTree::generate(shard, 4);
        let private = tree.private_record();
        let mut proof = prove(shard, &private.challenges[0], &tree.public_record()).unwrap();
        proof.response = hex::encode([0u8; 20]);
        assert!(!Verifier::new(&private).verify(&proof));
    }

    #[test]
    fn test_truncated_branch_fails() {
        let shard = b"stored shard bytes";
        let tree = AuditTree::generate(shard, 8);
        let private = tree.private_record();
        let mut proof = prove(shard, &private.challenges[1], &tree.public_record()).unwrap();
        proof.branch.pop();
        assert!(!Verifier::new(&private).verify(&proof));
    }

    #[test]
    fn test_wrong_leaf_index_fails() {
        let shard = b"stored shard bytes";
        let tree = AuditTree::generate(shard, 8);
        let private = tree.private_record();
        let mut proof = prove(shard, &private.challenges[2], &tree.public_record()).unwrap();
        proof.leaf_index ^= 1;
        assert!(!Verifier::new(&private).verify(&proof));
    }

    #[test]
    fn test_garbage_hex_fails_closed() {
        let tree = AuditTree::generate(b"shard", 2);
        let verifier = Verifier::new(&tree.private_record());
        let proof = AuditProof {
            leaf_index: 0,
            response: "zz".into(),
            branch: vec!["00".into()],
        };
        assert!(!verifier.verify(&proof));
    }
}
