use tally_types::{Collection, RecordId};

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: RecordId },

    /// The record changed since it was read.
    #[error("version conflict on {collection}/{id}: expected {expected}, found {found}")]
    Conflict {
        collection: Collection,
        id: RecordId,
        expected: u64,
        found: u64,
    },

    /// The upstream refused the request because of rate limiting.
    #[error("upstream throttled request #{request}")]
    Throttled { request: u64 },

    /// The backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A document could not be encoded or decoded.
    #[error("serialization error in {collection}: {reason}")]
    Serialization {
        collection: Collection,
        reason: String,
    },

    /// The query or patch was malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl StoreError {
    /// Whether re-issuing the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Unavailable(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
