//! `oracle-engine`: discovers, decides and tracks arbitration requests for
//! one trusted oracle.
//!
//! The engine talks to the ledger through the [`Ledger`] trait. Requests and
//! decisions are events on the trusted oracle arbiter contract; the ledger's
//! own event log is the only state, nothing is cached here.
//!
//! # Architecture
//!
//! ```text
//! Ledger (trait)      ← account, attestations, write_state, past events, subscribe
//!     │
//!     ▼
//! Delivery::detect     ← push on websocket/ipc, poll on http; decided once
//!     │
//!     ▼
//! EventFeed           ← implements futures::Stream<Item = LedgerResult<LedgerEvent>>
//!     │                  background task + mpsc channel
//!     ▼
//! OracleEngine        ← request / arbitrate / wait / catch-up / listen
//!     │                  escrow demands resolved with demand_core::ArbiterRegistry
//!     ▼
//! WatchHandle         ← unwatch() stops a live loop after its current item
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use oracle_engine::{ArbitrateFilters, ListenOptions, OracleEngine};
//!
//! let engine = OracleEngine::new(ledger, trusted_oracle_arbiter);
//! let filters = ArbitrateFilters { skip_already_arbitrated: true, ..Default::default() };
//! let outcome = engine
//!     .listen_and_arbitrate(
//!         |pending| {
//!             let ok = !pending.attestation.is_revoked();
//!             async move { Some(ok) }
//!         },
//!         ListenOptions::new(filters),
//!     )
//!     .await?;
//! println!("caught up with {} decisions", outcome.decisions.len());
//! // later
//! outcome.watch.unwatch();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod filters;
pub mod ledger;
pub mod memory;
pub mod transport;

pub use config::{ConfigWarning, OracleConfig, WarnLevel};
pub use engine::{
    AfterArbitrate, ArbitrationDecision, ArbitrationRequest, BatchReport, Decision, ItemOutcome,
    ItemReport, ListenOptions, ListenOutcome, OracleEngine, PendingObligation, WatchHandle,
};
pub use error::OracleError;
pub use feed::EventFeed;
pub use filters::ArbitrateFilters;
pub use ledger::{
    BlockRange, EventFilter, EventKind, EventPayload, EventSubscription, Ledger, LedgerCall,
    LedgerError, LedgerEvent, LedgerResult,
};
pub use memory::InMemoryLedger;
pub use transport::{
    is_push_capable, optimal_polling_interval, Delivery, TransportKind, DEFAULT_POLLING_INTERVAL,
};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, OracleError>;
