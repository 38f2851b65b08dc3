use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tally_store::{RecordStore, StoreError};
use tally_types::{round_money, Collection, Counterparty, CounterpartyRef, RecordId};

use crate::config::AdjusterConfig;
use crate::error::{LedgerError, LedgerResult};

/// Outcome of one incremental adjustment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Adjustment<T> {
    /// The record was rewritten.
    Applied { before: T, after: T },
    /// The record exists but the delta was zero; nothing was written.
    Unchanged(T),
    /// The target record does not exist. Not an error.
    NotFound,
}

impl<T> Adjustment<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Value after the adjustment, if the record exists.
    pub fn after(&self) -> Option<&T> {
        match self {
            Self::Applied { after, .. } => Some(after),
            Self::Unchanged(value) => Some(value),
            Self::NotFound => None,
        }
    }
}

/// A write decided by a read-modify-write step.
pub(crate) struct Planned<T> {
    pub patch: Value,
    pub before: T,
    pub after: T,
}

/// What a read-modify-write step wants to do with the record it read.
pub(crate) enum Plan<T> {
    Write(Planned<T>),
    Skip(T),
}

/// Read a record, let `plan` decide the patch, write it back guarded by the
/// version that was read. Conflicts re-read and retry.
///
/// Without contention this is exactly one `get` and at most one `update`.
pub(crate) async fn read_modify_write<S, R, T, F>(
    store: &S,
    collection: Collection,
    id: &RecordId,
    config: &AdjusterConfig,
    mut plan: F,
) -> LedgerResult<Adjustment<T>>
where
    S: RecordStore + ?Sized,
    R: DeserializeOwned,
    F: FnMut(&R) -> LedgerResult<Plan<T>>,
{
    let attempts = config.max_conflict_retries.saturating_add(1);
    for attempt in 1..=attempts {
        let Some(doc) = store.get(collection, id).await? else {
            debug!(%collection, %id, "adjustment target missing; skipping");
            return Ok(Adjustment::NotFound);
        };
        let current = doc.decode_in::<R>(collection)?;

        let planned = match plan(&current.record)? {
            Plan::Skip(value) => return Ok(Adjustment::Unchanged(value)),
            Plan::Write(planned) => planned,
        };

        match store
            .update(collection, id, planned.patch, Some(current.version))
            .await
        {
            Ok(_) => {
                return Ok(Adjustment::Applied {
                    before: planned.before,
                    after: planned.after,
                })
            }
            Err(StoreError::Conflict { found, .. }) => {
                warn!(%collection, %id, attempt, found, "concurrent write detected; re-reading");
            }
            Err(StoreError::NotFound { .. }) => return Ok(Adjustment::NotFound),
            Err(e) => return Err(e.into()),
        }
    }

    Err(LedgerError::Contended {
        collection,
        id: id.clone(),
        attempts,
    })
}

/// Incremental maintenance of the two counterparty balances.
pub struct BalanceAdjuster<'a, S: ?Sized> {
    store: &'a S,
    config: AdjusterConfig,
}

impl<'a, S: RecordStore + ?Sized> BalanceAdjuster<'a, S> {
    pub fn new(store: &'a S, config: AdjusterConfig) -> Self {
        Self { store, config }
    }

    /// Add a signed delta to the counterparty's money balance, rounding the
    /// result to two decimals.
    pub async fn adjust_money(
        &self,
        counterparty: &CounterpartyRef,
        delta: Decimal,
    ) -> LedgerResult<Adjustment<Decimal>> {
        let result = read_modify_write(
            self.store,
            counterparty.collection(),
            &counterparty.id,
            &self.config,
            |cp: &Counterparty| {
                let before = cp.current_money_balance;
                if delta.is_zero() {
                    return Ok(Plan::Skip(before));
                }
                let after = round_money(before + delta);
                Ok(Plan::Write(Planned {
                    patch: json!({ "current_money_balance": after }),
                    before,
                    after,
                }))
            },
        )
        .await?;

        if let Adjustment::Applied { before, after } = &result {
            debug!(%counterparty, %delta, %before, %after, "money balance adjusted");
        }
        Ok(result)
    }

    /// Add a signed delta to one container type in the counterparty's map.
    ///
    /// The whole map is written back cleaned of zero entries. Results are not
    /// clamped: a negative balance means the counterparty is owed containers.
    pub async fn adjust_containers(
        &self,
        counterparty: &CounterpartyRef,
        container_type: &str,
        delta: i64,
    ) -> LedgerResult<Adjustment<i64>> {
        let result = read_modify_write(
            self.store,
            counterparty.collection(),
            &counterparty.id,
            &self.config,
            |cp: &Counterparty| {
                let before = cp.container_balances.get(container_type);
                if delta == 0 {
                    return Ok(Plan::Skip(before));
                }
                let mut balances = cp.container_balances.clone();
                balances.apply(container_type, delta);
                Ok(Plan::Write(Planned {
                    patch: json!({ "container_balances": balances.to_value() }),
                    before,
                    after: balances.get(container_type),
                }))
            },
        )
        .await?;

        if let Adjustment::Applied { before, after } = &result {
            debug!(%counterparty, container_type, delta, before, after, "container balance adjusted");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tally_store::{
        get_counterparty, Document, Filter, InMemoryRecordStore, OrderKey, StoreResult,
    };

    use super::*;

    async fn supplier(store: &InMemoryRecordStore, body: Value) -> CounterpartyRef {
        let doc = store.create(Collection::Suppliers, body).await.unwrap();
        CounterpartyRef::supplier(doc.id)
    }

    #[tokio::test]
    async fn money_adjustments_accumulate_and_round() {
        let store = InMemoryRecordStore::new();
        let cp = supplier(&store, json!({"name": "Acme"})).await;
        let adjuster = BalanceAdjuster::new(&store, AdjusterConfig::default());

        adjuster.adjust_money(&cp, dec!(1000.00)).await.unwrap();
        let result = adjuster.adjust_money(&cp, dec!(-400.004)).await.unwrap();
        assert_eq!(
            result,
            Adjustment::Applied {
                before: dec!(1000.00),
                after: dec!(600.00)
            }
        );

        let stored = get_counterparty(&store, &cp).await.unwrap().unwrap();
        assert_eq!(stored.record.current_money_balance, dec!(600.00));
    }

    #[tokio::test]
    async fn zero_delta_reads_but_does_not_write() {
        let store = InMemoryRecordStore::new();
        let cp = supplier(&store, json!({"current_money_balance": "12.00"})).await;
        let adjuster = BalanceAdjuster::new(&store, AdjusterConfig::default());

        let reads_before = store.reads_served();
        let result = adjuster.adjust_money(&cp, Decimal::ZERO).await.unwrap();
        assert_eq!(result, Adjustment::Unchanged(dec!(12.00)));
        assert_eq!(store.reads_served(), reads_before + 1);

        let stored = store.get(Collection::Suppliers, &cp.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn missing_counterparty_is_a_silent_no_op() {
        let store = InMemoryRecordStore::new();
        let adjuster = BalanceAdjuster::new(&store, AdjusterConfig::default());
        let ghost = CounterpartyRef::customer("99999999");

        assert_eq!(
            adjuster.adjust_money(&ghost, dec!(5)).await.unwrap(),
            Adjustment::NotFound
        );
        assert_eq!(
            adjuster.adjust_containers(&ghost, "Crate", 5).await.unwrap(),
            Adjustment::NotFound
        );
    }

    #[tokio::test]
    async fn container_balance_goes_negative_and_drops_zeroes() {
        let store = InMemoryRecordStore::new();
        let cp = supplier(&store, json!({"container_balances": {"Bin-20kg": 2}})).await;
        let adjuster = BalanceAdjuster::new(&store, AdjusterConfig::default());

        adjuster.adjust_containers(&cp, "Crate", -5).await.unwrap();
        adjuster.adjust_containers(&cp, "Bin-20kg", -2).await.unwrap();

        let stored = store.get(Collection::Suppliers, &cp.id).await.unwrap().unwrap();
        assert_eq!(stored.body["container_balances"], json!({"Crate": -5}));
    }

    #[tokio::test]
    async fn malformed_container_map_is_replaced() {
        let store = InMemoryRecordStore::new();
        let cp = supplier(&store, json!({"container_balances": "garbage"})).await;
        let adjuster = BalanceAdjuster::new(&store, AdjusterConfig::default());

        let result = adjuster.adjust_containers(&cp, "Crate", 3).await.unwrap();
        assert_eq!(result, Adjustment::Applied { before: 0, after: 3 });

        let stored = store.get(Collection::Suppliers, &cp.id).await.unwrap().unwrap();
        assert_eq!(stored.body["container_balances"], json!({"Crate": 3}));
    }

    /// Store whose first `races` reads are each followed by a competing
    /// write, so the version read is already stale when the adjuster writes.
    struct RacingStore {
        inner: InMemoryRecordStore,
        races: AtomicU32,
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        async fn list(
            &self,
            collection: Collection,
            order: &OrderKey,
            limit: usize,
            offset: usize,
        ) -> StoreResult<Vec<Document>> {
            self.inner.list(collection, order, limit, offset).await
        }

        async fn filter(
            &self,
            collection: Collection,
            criteria: &Filter,
            order: &OrderKey,
            limit: usize,
            offset: usize,
        ) -> StoreResult<Vec<Document>> {
            self.inner.filter(collection, criteria, order, limit, offset).await
        }

        async fn get(&self, collection: Collection, id: &RecordId) -> StoreResult<Option<Document>> {
            let doc = self.inner.get(collection, id).await?;
            let raced = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if raced {
                self.inner
                    .update(collection, id, json!({"name": "renamed elsewhere"}), None)
                    .await?;
            }
            Ok(doc)
        }

        async fn create(&self, collection: Collection, body: Value) -> StoreResult<Document> {
            self.inner.create(collection, body).await
        }

        async fn update(
            &self,
            collection: Collection,
            id: &RecordId,
            patch: Value,
            expected_version: Option<u64>,
        ) -> StoreResult<Document> {
            self.inner.update(collection, id, patch, expected_version).await
        }

        async fn delete(&self, collection: Collection, id: &RecordId) -> StoreResult<bool> {
            self.inner.delete(collection, id).await
        }
    }

    async fn racing_store(races: u32) -> (RacingStore, CounterpartyRef) {
        let inner = InMemoryRecordStore::new();
        let cp = supplier(&inner, json!({"current_money_balance": "10.00"})).await;
        let store = RacingStore {
            inner,
            races: AtomicU32::new(races),
        };
        (store, cp)
    }

    #[tokio::test]
    async fn conflicts_are_retried_without_losing_the_competing_write() {
        let (store, cp) = racing_store(2).await;
        let adjuster = BalanceAdjuster::new(&store, AdjusterConfig::default());

        let result = adjuster.adjust_money(&cp, dec!(2.50)).await.unwrap();
        assert_eq!(
            result,
            Adjustment::Applied {
                before: dec!(10.00),
                after: dec!(12.50)
            }
        );

        let stored = get_counterparty(&store.inner, &cp).await.unwrap().unwrap();
        assert_eq!(stored.record.current_money_balance, dec!(12.50));
        assert_eq!(stored.record.name, "renamed elsewhere");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_contention() {
        let (store, cp) = racing_store(10).await;
        let adjuster = BalanceAdjuster::new(
            &store,
            AdjusterConfig {
                max_conflict_retries: 2,
            },
        );

        let err = adjuster.adjust_money(&cp, dec!(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Contended { attempts: 3, .. }));
    }
}
