use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use demand_core::{Address, Attestation, Bytes, TxRef, Uid, B256};

use crate::transport::TransportKind;

// ─── LedgerError ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected by ledger: {0}")]
    Rejected(String),

    #[error("unsupported on this transport: {0}")]
    Unsupported(String),

    #[error("ledger connection closed")]
    Closed,
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

// ─── Calls ────────────────────────────────────────────────────────────────

/// State-changing calls the engine makes against the trusted oracle arbiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerCall {
    RequestArbitration {
        obligation: Uid,
        oracle: Address,
        demand: Bytes,
    },
    /// Recorded under the caller's account as the deciding oracle.
    Arbitrate {
        obligation: Uid,
        demand: Bytes,
        decision: bool,
    },
}

// ─── Events ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ArbitrationRequested,
    ArbitrationMade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ArbitrationRequested {
        obligation: Uid,
        oracle: Address,
        demand: Bytes,
    },
    /// `decision_key` is `keccak256(obligation ++ demand)` over the demand
    /// the decision answers.
    ArbitrationMade {
        decision_key: B256,
        obligation: Uid,
        oracle: Address,
        decision: bool,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ArbitrationRequested { .. } => EventKind::ArbitrationRequested,
            EventPayload::ArbitrationMade { .. } => EventKind::ArbitrationMade,
        }
    }

    pub fn obligation(&self) -> Uid {
        match self {
            EventPayload::ArbitrationRequested { obligation, .. }
            | EventPayload::ArbitrationMade { obligation, .. } => *obligation,
        }
    }

    pub fn oracle(&self) -> Address {
        match self {
            EventPayload::ArbitrationRequested { oracle, .. }
            | EventPayload::ArbitrationMade { oracle, .. } => *oracle,
        }
    }

    pub fn decision_key(&self) -> Option<B256> {
        match self {
            EventPayload::ArbitrationMade { decision_key, .. } => Some(*decision_key),
            EventPayload::ArbitrationRequested { .. } => None,
        }
    }
}

/// A log entry. Ledger order is `(block_number, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub contract: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx: TxRef,
    pub payload: EventPayload,
}

impl LedgerEvent {
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Selects events of one kind from one contract, optionally narrowed by the
/// indexed `obligation`, `oracle` and `decision_key` topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub contract: Address,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obligation: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_key: Option<B256>,
}

impl EventFilter {
    pub fn new(contract: Address, kind: EventKind) -> Self {
        EventFilter {
            contract,
            kind,
            obligation: None,
            oracle: None,
            decision_key: None,
        }
    }

    pub fn obligation(mut self, uid: Uid) -> Self {
        self.obligation = Some(uid);
        self
    }

    pub fn oracle(mut self, oracle: Address) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Only decisions carry a key; setting one excludes every request.
    pub fn decision_key(mut self, key: B256) -> Self {
        self.decision_key = Some(key);
        self
    }

    pub fn matches(&self, event: &LedgerEvent) -> bool {
        event.contract == self.contract
            && event.payload.kind() == self.kind
            && self.obligation.map_or(true, |uid| event.payload.obligation() == uid)
            && self.oracle.map_or(true, |o| event.payload.oracle() == o)
            && self
                .decision_key
                .map_or(true, |key| event.payload.decision_key() == Some(key))
    }
}

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        BlockRange { from, to }
    }

    pub fn up_to(to: u64) -> Self {
        BlockRange { from: 0, to }
    }

    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }
}

/// Push-delivered events. Ends when the ledger drops the subscription.
pub type EventSubscription = BoxStream<'static, LedgerResult<LedgerEvent>>;

// ─── Ledger ───────────────────────────────────────────────────────────────

/// The ledger / attestation store, as seen by the engine.
///
/// Writes are signed by [`Ledger::account`]; that account is the oracle
/// identity the engine arbitrates as.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn account(&self) -> Address;

    fn transport(&self) -> TransportKind;

    async fn block_number(&self) -> LedgerResult<u64>;

    async fn get_attestation(&self, uid: Uid) -> LedgerResult<Attestation>;

    async fn write_state(&self, contract: Address, call: LedgerCall) -> LedgerResult<TxRef>;

    async fn get_past_events(
        &self,
        filter: &EventFilter,
        range: BlockRange,
    ) -> LedgerResult<Vec<LedgerEvent>>;

    /// Only push-capable transports support this; others return
    /// [`LedgerError::Unsupported`].
    async fn subscribe(&self, filter: &EventFilter) -> LedgerResult<EventSubscription>;
}
