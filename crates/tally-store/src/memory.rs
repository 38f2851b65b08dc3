use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_types::{Collection, RecordId};

use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::query::{Filter, OrderKey};
use crate::traits::RecordStore;

/// Failure behavior injected into an [`InMemoryRecordStore`].
///
/// Counters restart whenever a new plan is installed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    /// Silently cap every `list`/`filter` page at this many records.
    pub page_cap: Option<usize>,
    /// Serve this many reads, then answer every further read with `Throttled`.
    pub throttle_after_requests: Option<u64>,
    /// Accept this many writes, then fail every further write.
    pub fail_writes_after: Option<u64>,
}

/// Serializable image of every collection, used to persist the in-memory
/// store between CLI invocations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub collections: BTreeMap<Collection, Vec<Document>>,
}

type Collections = HashMap<Collection, BTreeMap<RecordId, Document>>;

/// In-memory record store.
///
/// Intended for tests, the CLI, and embedding. Ids are zero-padded sequence
/// numbers, so id order is creation order.
pub struct InMemoryRecordStore {
    inner: RwLock<Collections>,
    faults: RwLock<FaultPlan>,
    next_id: AtomicU64,
    reads_served: AtomicU64,
    reads_since_plan: AtomicU64,
    writes_since_plan: AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            faults: RwLock::new(FaultPlan::default()),
            next_id: AtomicU64::new(1),
            reads_served: AtomicU64::new(0),
            reads_since_plan: AtomicU64::new(0),
            writes_since_plan: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_faults(self, plan: FaultPlan) -> Self {
        self.set_faults(plan);
        self
    }

    /// Install a new fault plan and restart its counters.
    pub fn set_faults(&self, plan: FaultPlan) {
        if let Ok(mut faults) = self.faults.write() {
            *faults = plan;
        }
        self.reads_since_plan.store(0, Ordering::SeqCst);
        self.writes_since_plan.store(0, Ordering::SeqCst);
    }

    /// Number of successful reads (`list`, `filter`, `get`) served so far.
    pub fn reads_served(&self) -> u64 {
        self.reads_served.load(Ordering::SeqCst)
    }

    /// Number of records in one collection.
    pub fn count(&self, collection: Collection) -> usize {
        self.inner
            .read()
            .map(|map| map.get(&collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Restore a store from a snapshot. Numeric ids continue after the
    /// highest one present.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut store = Self::new();
        let mut max_id = 0u64;
        let mut map = HashMap::new();
        for (collection, docs) in snapshot.collections {
            let mut records = BTreeMap::new();
            for doc in docs {
                if let Ok(n) = doc.id.as_str().parse::<u64>() {
                    max_id = max_id.max(n);
                }
                records.insert(doc.id.clone(), doc);
            }
            map.insert(collection, records);
        }
        store.next_id.store(max_id + 1, Ordering::SeqCst);
        store.inner = RwLock::new(map);
        store
    }

    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let map = self.read_state()?;
        let collections = map
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(collection, docs)| (*collection, docs.values().cloned().collect()))
            .collect();
        Ok(StoreSnapshot { collections })
    }

    fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, Collections>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn write_state(&self) -> StoreResult<RwLockWriteGuard<'_, Collections>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn plan(&self) -> FaultPlan {
        self.faults.read().map(|p| p.clone()).unwrap_or_default()
    }

    fn admit_read(&self) -> StoreResult<()> {
        let request = self.reads_since_plan.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.plan().throttle_after_requests {
            if request > limit {
                return Err(StoreError::Throttled { request });
            }
        }
        self.reads_served.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn admit_write(&self) -> StoreResult<()> {
        let write = self.writes_since_plan.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.plan().fail_writes_after {
            if write > limit {
                return Err(StoreError::Unavailable(format!(
                    "injected failure on write #{write}"
                )));
            }
        }
        Ok(())
    }

    fn page(
        &self,
        mut docs: Vec<Document>,
        order: &OrderKey,
        limit: usize,
        offset: usize,
    ) -> Vec<Document> {
        let limit = match self.plan().page_cap {
            Some(cap) => limit.min(cap),
            None => limit,
        };
        docs.sort_by(|a, b| order.compare(a, b));
        docs.into_iter().skip(offset).take(limit).collect()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total: usize = Collection::ALL.iter().map(|c| self.count(*c)).sum();
        f.debug_struct("InMemoryRecordStore")
            .field("record_count", &total)
            .finish()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn list(
        &self,
        collection: Collection,
        order: &OrderKey,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Document>> {
        self.admit_read()?;
        let docs: Vec<Document> = {
            let map = self.read_state()?;
            map.get(&collection)
                .map(|records| records.values().cloned().collect())
                .unwrap_or_default()
        };
        Ok(self.page(docs, order, limit, offset))
    }

    async fn filter(
        &self,
        collection: Collection,
        criteria: &Filter,
        order: &OrderKey,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Document>> {
        self.admit_read()?;
        let docs: Vec<Document> = {
            let map = self.read_state()?;
            map.get(&collection)
                .map(|records| {
                    records
                        .values()
                        .filter(|doc| criteria.matches(doc))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(self.page(docs, order, limit, offset))
    }

    async fn get(&self, collection: Collection, id: &RecordId) -> StoreResult<Option<Document>> {
        self.admit_read()?;
        let map = self.read_state()?;
        Ok(map.get(&collection).and_then(|records| records.get(id)).cloned())
    }

    async fn create(&self, collection: Collection, body: Value) -> StoreResult<Document> {
        if !body.is_object() {
            return Err(StoreError::InvalidQuery(format!(
                "{collection} body must be a JSON object"
            )));
        }
        self.admit_write()?;
        let id = RecordId::new(format!(
            "{:08}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        let doc = Document {
            id: id.clone(),
            version: 1,
            body,
        };
        let mut map = self.write_state()?;
        map.entry(collection).or_default().insert(id, doc.clone());
        Ok(doc)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &RecordId,
        patch: Value,
        expected_version: Option<u64>,
    ) -> StoreResult<Document> {
        let Value::Object(fields) = patch else {
            return Err(StoreError::InvalidQuery(format!(
                "{collection} patch must be a JSON object"
            )));
        };
        self.admit_write()?;
        let mut map = self.write_state()?;
        let doc = map
            .get_mut(&collection)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.clone(),
            })?;

        if let Some(expected) = expected_version {
            if doc.version != expected {
                return Err(StoreError::Conflict {
                    collection,
                    id: id.clone(),
                    expected,
                    found: doc.version,
                });
            }
        }

        if let Value::Object(body) = &mut doc.body {
            for (key, value) in fields {
                body.insert(key, value);
            }
        } else {
            doc.body = Value::Object(fields);
        }
        doc.version += 1;
        Ok(doc.clone())
    }

    async fn delete(&self, collection: Collection, id: &RecordId) -> StoreResult<bool> {
        self.admit_write()?;
        let mut map = self.write_state()?;
        Ok(map
            .get_mut(&collection)
            .is_some_and(|records| records.remove(id).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let store = InMemoryRecordStore::new();
        let a = store.create(Collection::Products, json!({"stock": 1})).await.unwrap();
        let b = store.create(Collection::Suppliers, json!({"name": "x"})).await.unwrap();
        assert_eq!(a.id.as_str(), "00000001");
        assert_eq!(b.id.as_str(), "00000002");
        assert_eq!(a.version, 1);
    }

    #[tokio::test]
    async fn update_merges_top_level_fields() {
        let store = InMemoryRecordStore::new();
        let doc = store
            .create(Collection::Products, json!({"name": "Onion", "stock": 4}))
            .await
            .unwrap();
        let updated = store
            .update(Collection::Products, &doc.id, json!({"stock": 9}), None)
            .await
            .unwrap();
        assert_eq!(updated.body, json!({"name": "Onion", "stock": 9}));
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemoryRecordStore::new();
        let doc = store.create(Collection::Products, json!({"stock": 4})).await.unwrap();
        store
            .update(Collection::Products, &doc.id, json!({"stock": 5}), Some(1))
            .await
            .unwrap();
        let err = store
            .update(Collection::Products, &doc.id, json!({"stock": 6}), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, found: 2, .. }));
        let current = store.get(Collection::Products, &doc.id).await.unwrap().unwrap();
        assert_eq!(current.body["stock"], json!(5));
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = InMemoryRecordStore::new();
        let err = store
            .update(Collection::Products, &RecordId::from("404"), json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn non_object_bodies_are_rejected() {
        let store = InMemoryRecordStore::new();
        assert!(store.create(Collection::Products, json!(3)).await.is_err());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryRecordStore::new();
        let doc = store.create(Collection::Products, json!({})).await.unwrap();
        assert!(store.delete(Collection::Products, &doc.id).await.unwrap());
        assert!(!store.delete(Collection::Products, &doc.id).await.unwrap());
        assert_eq!(store.count(Collection::Products), 0);
    }

    #[tokio::test]
    async fn injected_write_failures_leave_state_untouched() {
        let store = InMemoryRecordStore::new();
        let doc = store.create(Collection::Products, json!({"stock": 1})).await.unwrap();
        store.set_faults(FaultPlan {
            fail_writes_after: Some(1),
            ..FaultPlan::default()
        });
        store
            .update(Collection::Products, &doc.id, json!({"stock": 2}), None)
            .await
            .unwrap();
        let err = store
            .update(Collection::Products, &doc.id, json!({"stock": 3}), None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        let current = store.get(Collection::Products, &doc.id).await.unwrap().unwrap();
        assert_eq!(current.body["stock"], json!(2));
    }

    #[tokio::test]
    async fn snapshot_round_trip_continues_id_sequence() {
        let store = InMemoryRecordStore::new();
        store.create(Collection::Products, json!({"stock": 1})).await.unwrap();
        store.create(Collection::Customers, json!({"name": "c"})).await.unwrap();

        let json = serde_json::to_string(&store.snapshot().unwrap()).unwrap();
        let restored = InMemoryRecordStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.count(Collection::Products), 1);
        assert_eq!(restored.count(Collection::Customers), 1);

        let next = restored.create(Collection::Products, json!({})).await.unwrap();
        assert_eq!(next.id.as_str(), "00000003");
    }
}
