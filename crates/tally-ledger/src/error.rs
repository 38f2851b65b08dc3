use rust_decimal::Decimal;
use tally_store::StoreError;
use tally_types::{Collection, RecordId};

/// Errors produced by ledger and adjuster operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger amounts must be non-negative, got {0}")]
    NegativeAmount(Decimal),

    #[error("gave up on {collection}/{id} after {attempts} conflicting writes")]
    Contended {
        collection: Collection,
        id: RecordId,
        attempts: u32,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
