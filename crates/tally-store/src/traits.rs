use async_trait::async_trait;
use serde_json::Value;
use tally_types::{Collection, RecordId};

use crate::document::Document;
use crate::error::StoreResult;
use crate::query::{Filter, OrderKey};

/// Generic record store consumed by the balance engine.
///
/// Implementations must satisfy these rules:
/// - `list` and `filter` return at most `limit` records starting at `offset`
///   in the given order. An upstream may cap `limit` silently, so callers that
///   need a whole collection page through it.
/// - `update` merges the top-level fields of `patch` into the stored body and
///   bumps the version. When `expected_version` is set and differs from the
///   stored version the update fails with `Conflict` and nothing is written.
/// - There is no transaction spanning several calls.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(
        &self,
        collection: Collection,
        order: &OrderKey,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Document>>;

    async fn filter(
        &self,
        collection: Collection,
        criteria: &Filter,
        order: &OrderKey,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Document>>;

    /// Fetch one record by id. Returns `Ok(None)` if it does not exist.
    async fn get(&self, collection: Collection, id: &RecordId) -> StoreResult<Option<Document>>;

    async fn create(&self, collection: Collection, body: Value) -> StoreResult<Document>;

    async fn update(
        &self,
        collection: Collection,
        id: &RecordId,
        patch: Value,
        expected_version: Option<u64>,
    ) -> StoreResult<Document>;

    /// Delete a record. Returns `true` if it existed.
    async fn delete(&self, collection: Collection, id: &RecordId) -> StoreResult<bool>;
}
