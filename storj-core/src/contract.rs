//! Storage contracts between a renter and a farmer
//!
//! A contract travels through the negotiation incomplete: the renter signs
//! and publishes it with the farmer fields unset, an interested farmer
//! fills in its identity and countersigns, and the renter re-signs the
//! completed form when accepting the offer. Signatures cover the canonical
//! JSON object with both signature fields cleared, so either party's
//! signature commits to every other field.

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::keys::KeyPair;
use crate::types::{NodeId, ShardHash};

/// Party to a storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Renter,
    Farmer,
}

/// Agreement to store one shard for a bounded period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Contract {
    version: u32,
    renter_id: Option<NodeId>,
    renter_signature: Option<String>,
    farmer_id: Option<NodeId>,
    farmer_signature: Option<String>,
    data_hash: ShardHash,
    data_size: u64,
    store_begin: u64,
    store_end: u64,
    audit_count: u32,
    payment_destination: Option<String>,
}

impl Contract {
    /// Current contract version drafted by this node.
    pub const VERSION: u32 = 1;

    /// Pub/sub topic for a given contract version.
    pub fn topic_for_version(version: u32) -> String {
        format!("contract-v{}", version)
    }

    /// Draft a version-1 contract for the renter side.
    pub fn new(
        renter_id: NodeId,
        data_hash: ShardHash,
        data_size: u64,
        store_begin: u64,
        store_end: u64,
        audit_count: u32,
    ) -> Self {
        Self {
            version: 1,
            renter_id: Some(renter_id),
            renter_signature: None,
            farmer_id: None,
            farmer_signature: None,
            data_hash,
            data_size,
            store_begin,
            store_end,
            audit_count,
            payment_destination: None,
        }
    }

    /// Pub/sub topic this contract is published on.
    pub fn topic(&self) -> String {
        Self::topic_for_version(self.version)
    }

    pub fn renter_id(&self) -> Option<NodeId> {
        self.renter_id
    }

    pub fn farmer_id(&self) -> Option<NodeId> {
        self.farmer_id
    }

    pub fn data_hash(&self) -> ShardHash {
        self.data_hash
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn store_begin(&self) -> u64 {
        self.store_begin
    }

    pub fn store_end(&self) -> u64 {
        self.store_end
    }

    pub fn audit_count(&self) -> u32 {
        self.audit_count
    }

    pub fn payment_destination(&self) -> Option<&str> {
        self.payment_destination.as_deref()
    }

    pub fn set_farmer_id(&mut self, farmer_id: NodeId) -> Result<()> {
        self.ensure_mutable()?;
        self.farmer_id = Some(farmer_id);
        Ok(())
    }

    pub fn set_payment_destination(&mut self, destination: String) -> Result<()> {
        self.ensure_mutable()?;
        self.payment_destination = Some(destination);
        Ok(())
    }

    /// Both parties have signed.
    pub fn is_complete(&self) -> bool {
        self.renter_id.is_some()
            && self.renter_signature.is_some()
            && self.farmer_id.is_some()
            && self.farmer_signature.is_some()
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_complete() {
            return Err(NodeError::ContractRejected(
                "contract is complete and immutable".into(),
            ));
        }
        Ok(())
    }

    /// Canonical signing form: the JSON object with both signatures cleared.
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut clean = self.clone();
        clean.renter_signature = None;
        clean.farmer_signature = None;
        Ok(serde_json::to_vec(&clean)?)
    }

    /// Sign the canonical form as the given role.
    pub fn sign(&mut self, role: Role, keys: &KeyPair) -> Result<()> {
        let signature = keys.sign(&self.canonical_bytes()?);
        match role {
            Role::Renter => self.renter_signature = Some(signature),
            Role::Farmer => self.farmer_signature = Some(signature),
        }
        Ok(())
    }

    /// Verify the given role's signature and that it binds to the expected
    /// node id.
    pub fn verify(&self, role: Role, expected: &NodeId) -> Result<()> {
        let (signature, claimed) = match role {
            Role::Renter => (&self.renter_signature, self.renter_id),
            Role::Farmer => (&self.farmer_signature, self.farmer_id),
        };
        let signature = signature.as_ref().ok_or(NodeError::SignatureInvalid)?;
        if claimed != Some(*expected) {
            return Err(NodeError::NodeIdMismatch);
        }
        KeyPair::verify(&self.canonical_bytes()?, signature, expected)?;
        Ok(())
    }
}
