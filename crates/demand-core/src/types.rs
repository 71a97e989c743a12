use serde::{Deserialize, Serialize};

pub use alloy_primitives::{Address, Bytes, B256, U256};

/// Attestation identifier.
pub type Uid = B256;

/// Reference to a submitted transaction.
pub type TxRef = B256;

// ---------------------------------------------------------------------------
// Demand
// ---------------------------------------------------------------------------

/// A release condition: the arbiter that judges it and its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demand {
    pub arbiter: Address,
    pub demand: Bytes,
}

impl Demand {
    pub fn new(arbiter: Address, demand: impl Into<Bytes>) -> Self {
        Demand {
            arbiter,
            demand: demand.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Attestation
// ---------------------------------------------------------------------------

/// A ledger record. Owned by the attestation store; read-only here.
///
/// Times are unix seconds, `0` meaning unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub uid: Uid,
    pub schema: B256,
    pub time: u64,
    pub expiration_time: u64,
    pub revocation_time: u64,
    #[serde(rename = "refUID")]
    pub ref_uid: Uid,
    pub recipient: Address,
    pub attester: Address,
    pub revocable: bool,
    pub data: Bytes,
}

impl Attestation {
    pub fn is_revoked(&self) -> bool {
        self.revocation_time != 0
    }

    /// Expired at `now` (unix seconds). Attestations without an expiration never expire.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expiration_time != 0 && self.expiration_time < now
    }

    pub fn has_ref(&self) -> bool {
        self.ref_uid != Uid::ZERO
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
