use thiserror::Error;

use demand_core::{DemandError, Uid, B256};

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Demand(#[from] DemandError),

    #[error("attestation {uid} has schema {actual}, expected {expected}")]
    SchemaMismatch { uid: Uid, expected: B256, actual: B256 },

    #[error("change feed closed before the awaited event arrived")]
    FeedClosed,

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
