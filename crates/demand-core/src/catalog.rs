use serde::{Deserialize, Serialize};

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::keccak256;

use crate::codec::{DemandCodec, DemandSchema, Record};
use crate::error::{DemandError, Result};
use crate::registry::{ArbiterDemandParser, ArbiterRegistry};
use crate::types::{Address, Bytes, B256, Uid};

// ---------------------------------------------------------------------------
// BuiltinArbiter
// ---------------------------------------------------------------------------

/// The arbiters deployed alongside the escrow contracts, with their demand shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinArbiter {
    TrustedOracle,
    All,
    Any,
    Attester,
    Recipient,
    RefUid,
    Revocable,
    Schema,
    Uid,
    TimeAfter,
    TimeBefore,
    TimeEqual,
    ExpirationTimeAfter,
    ExpirationTimeBefore,
    ExpirationTimeEqual,
}

impl BuiltinArbiter {
    pub const ALL: [BuiltinArbiter; 15] = [
        BuiltinArbiter::TrustedOracle,
        BuiltinArbiter::All,
        BuiltinArbiter::Any,
        BuiltinArbiter::Attester,
        BuiltinArbiter::Recipient,
        BuiltinArbiter::RefUid,
        BuiltinArbiter::Revocable,
        BuiltinArbiter::Schema,
        BuiltinArbiter::Uid,
        BuiltinArbiter::TimeAfter,
        BuiltinArbiter::TimeBefore,
        BuiltinArbiter::TimeEqual,
        BuiltinArbiter::ExpirationTimeAfter,
        BuiltinArbiter::ExpirationTimeBefore,
        BuiltinArbiter::ExpirationTimeEqual,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinArbiter::TrustedOracle => "TrustedOracleArbiter",
            BuiltinArbiter::All => "AllArbiter",
            BuiltinArbiter::Any => "AnyArbiter",
            BuiltinArbiter::Attester => "AttesterArbiter",
            BuiltinArbiter::Recipient => "RecipientArbiter",
            BuiltinArbiter::RefUid => "RefUidArbiter",
            BuiltinArbiter::Revocable => "RevocableArbiter",
            BuiltinArbiter::Schema => "SchemaArbiter",
            BuiltinArbiter::Uid => "UidArbiter",
            BuiltinArbiter::TimeAfter => "TimeAfterArbiter",
            BuiltinArbiter::TimeBefore => "TimeBeforeArbiter",
            BuiltinArbiter::TimeEqual => "TimeEqualArbiter",
            BuiltinArbiter::ExpirationTimeAfter => "ExpirationTimeAfterArbiter",
            BuiltinArbiter::ExpirationTimeBefore => "ExpirationTimeBeforeArbiter",
            BuiltinArbiter::ExpirationTimeEqual => "ExpirationTimeEqualArbiter",
        }
    }

    pub fn signature(self) -> &'static str {
        match self {
            BuiltinArbiter::TrustedOracle => "address oracle, bytes data",
            BuiltinArbiter::All | BuiltinArbiter::Any => "address[] arbiters, bytes[] demands",
            BuiltinArbiter::Attester => "address attester",
            BuiltinArbiter::Recipient => "address recipient",
            BuiltinArbiter::RefUid => "bytes32 refUID",
            BuiltinArbiter::Revocable => "bool revocable",
            BuiltinArbiter::Schema => "bytes32 schema",
            BuiltinArbiter::Uid => "bytes32 uid",
            BuiltinArbiter::TimeAfter | BuiltinArbiter::TimeBefore | BuiltinArbiter::TimeEqual => {
                "uint64 time"
            }
            BuiltinArbiter::ExpirationTimeAfter
            | BuiltinArbiter::ExpirationTimeBefore
            | BuiltinArbiter::ExpirationTimeEqual => "uint64 expirationTime",
        }
    }

    pub fn is_fanout(self) -> bool {
        matches!(self, BuiltinArbiter::All | BuiltinArbiter::Any)
    }

    pub fn schema(self) -> Result<DemandSchema> {
        DemandSchema::parse(self.name(), self.signature())
    }

    pub fn codec(self) -> Result<DemandCodec> {
        DemandCodec::non_composing(self.schema()?)
    }

    pub fn parser(self) -> Result<ArbiterDemandParser> {
        let codec = self.codec()?;
        if self.is_fanout() {
            codec.fanout_parser()
        } else {
            Ok(codec.parser())
        }
    }
}

// ---------------------------------------------------------------------------
// ArbiterAddresses
// ---------------------------------------------------------------------------

/// Where the built-in arbiters are deployed. Absent entries are not registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterAddresses {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_oracle_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub any_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attester_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_uid_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocable_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_after_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_before_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_equal_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time_after_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time_before_arbiter: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time_equal_arbiter: Option<Address>,
}

impl ArbiterAddresses {
    pub fn get(&self, arbiter: BuiltinArbiter) -> Option<Address> {
        match arbiter {
            BuiltinArbiter::TrustedOracle => self.trusted_oracle_arbiter,
            BuiltinArbiter::All => self.all_arbiter,
            BuiltinArbiter::Any => self.any_arbiter,
            BuiltinArbiter::Attester => self.attester_arbiter,
            BuiltinArbiter::Recipient => self.recipient_arbiter,
            BuiltinArbiter::RefUid => self.ref_uid_arbiter,
            BuiltinArbiter::Revocable => self.revocable_arbiter,
            BuiltinArbiter::Schema => self.schema_arbiter,
            BuiltinArbiter::Uid => self.uid_arbiter,
            BuiltinArbiter::TimeAfter => self.time_after_arbiter,
            BuiltinArbiter::TimeBefore => self.time_before_arbiter,
            BuiltinArbiter::TimeEqual => self.time_equal_arbiter,
            BuiltinArbiter::ExpirationTimeAfter => self.expiration_time_after_arbiter,
            BuiltinArbiter::ExpirationTimeBefore => self.expiration_time_before_arbiter,
            BuiltinArbiter::ExpirationTimeEqual => self.expiration_time_equal_arbiter,
        }
    }

    /// Deployed entries, in catalog order.
    pub fn deployed(&self) -> impl Iterator<Item = (BuiltinArbiter, Address)> + '_ {
        BuiltinArbiter::ALL
            .into_iter()
            .filter_map(move |b| self.get(b).map(|a| (b, a)))
    }
}

impl ArbiterRegistry {
    /// A registry with every deployed built-in arbiter registered.
    pub fn with_builtin(addresses: &ArbiterAddresses) -> Result<Self> {
        let mut registry = ArbiterRegistry::new();
        for (builtin, address) in addresses.deployed() {
            registry.register(address, builtin.parser()?);
        }
        Ok(registry)
    }
}

// ---------------------------------------------------------------------------
// TrustedOracle helpers
// ---------------------------------------------------------------------------

/// Encode a TrustedOracle demand naming `oracle`, with `data` passed through to it.
pub fn trusted_oracle_demand(oracle: Address, data: impl Into<Bytes>) -> Result<Bytes> {
    let data: Bytes = data.into();
    BuiltinArbiter::TrustedOracle.codec()?.encode(
        &Record::new()
            .with("oracle", DynSolValue::Address(oracle))
            .with("data", DynSolValue::Bytes(data.to_vec())),
    )
}

/// The oracle named by a TrustedOracle demand, and the payload handed to it.
pub fn decode_trusted_oracle(demand: &[u8]) -> Result<(Address, Bytes)> {
    let record = BuiltinArbiter::TrustedOracle.codec()?.decode(demand)?;
    match (record.address("oracle"), record.bytes("data")) {
        (Some(oracle), Some(data)) => Ok((oracle, Bytes::copy_from_slice(data))),
        _ => Err(DemandError::decode("TrustedOracleArbiter: missing fields")),
    }
}

/// The inner `data` of a TrustedOracle demand. An empty demand has empty data.
pub fn trusted_oracle_inner_data(demand: &[u8]) -> Result<Bytes> {
    if demand.is_empty() {
        return Ok(Bytes::new());
    }
    decode_trusted_oracle(demand).map(|(_, data)| data)
}

/// Identifies one decision: `keccak256(obligation ++ demand)`, where
/// `demand` is the inner data the oracle was asked about. Two requests on the
/// same obligation with different demands get different keys.
pub fn decision_key(obligation: Uid, demand: &[u8]) -> B256 {
    let mut packed = Vec::with_capacity(32 + demand.len());
    packed.extend_from_slice(obligation.as_slice());
    packed.extend_from_slice(demand);
    keccak256(packed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
