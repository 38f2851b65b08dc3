use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("invalid counterparty reference: {0}")]
    InvalidCounterparty(String),

    #[error("invalid direction: {0}")]
    InvalidDirection(String),
}
