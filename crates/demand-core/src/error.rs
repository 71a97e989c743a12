use thiserror::Error;

use crate::types::Address;

#[derive(Debug, Error)]
pub enum DemandError {
    #[error("malformed demand bytes: {0}")]
    Decode(String),

    #[error("record does not match schema '{schema}': {reason}")]
    ShapeMismatch { schema: String, reason: String },

    #[error("field '{field}' is declared twice in schema '{schema}'")]
    DuplicateField { schema: String, field: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("composing arbiter {arbiter} decoded without a base demand or arbiter list")]
    MissingComposition { arbiter: Address },

    #[error("demand nesting exceeds {limit} levels at arbiter {arbiter}")]
    RecursionLimitExceeded { limit: usize, arbiter: Address },
}

impl DemandError {
    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        DemandError::Decode(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, DemandError>;
