use tally_ledger::LedgerError;
use tally_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("unknown correction operation: {0}")]
    UnknownOperation(String),

    #[error("could not digest inputs: {0}")]
    Digest(String),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
