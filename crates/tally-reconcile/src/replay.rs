use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use tally_ledger::{fold_container_events, thread_entries, MoneyThread};
use tally_store::{RecordStore, Stored};
use tally_types::{ContainerBalances, CounterpartyRef, LedgerEntry};

use crate::config::ReconcileConfig;
use crate::digest::{Digest, DigestBuilder};
use crate::error::ReconcileResult;
use crate::history::{
    digest_counterparty_set, digest_ledger, group_by_counterparty, load_counterparties,
    load_counterparty_ledger, load_ledger, ContainerSources, Counterparties,
};
use crate::orchestrator::CorrectionKind;
use crate::writer::{BatchWriter, CheckpointKey, StagedWrite, WriteTarget};

/// Counts reported by every replay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub records_scanned: usize,
    pub events_processed: usize,
    pub counterparties_updated: usize,
    pub counterparties_unchanged: usize,
    pub entries_rethreaded: usize,
    pub entries_unchanged: usize,
    pub entries_removed: usize,
    pub resumed_from: usize,
}

/// Staged money state: a balance for every known counterparty and the
/// threaded entries of every counterparty that has any.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoneyStage {
    pub balances: BTreeMap<CounterpartyRef, Decimal>,
    pub threads: BTreeMap<CounterpartyRef, MoneyThread>,
}

pub fn stage_money(entries: &[Stored<LedgerEntry>], counterparties: &Counterparties) -> MoneyStage {
    let threads: BTreeMap<CounterpartyRef, MoneyThread> =
        group_by_counterparty(entries, counterparties)
            .into_iter()
            .map(|(counterparty, group)| (counterparty, thread_entries(group)))
            .collect();
    let balances = counterparties
        .keys()
        .map(|counterparty| {
            let balance = threads
                .get(counterparty)
                .map_or(Decimal::ZERO, |thread| thread.balance);
            (counterparty.clone(), balance)
        })
        .collect();
    MoneyStage { balances, threads }
}

/// Staged container maps for every known counterparty, plus the number of
/// events folded.
pub fn stage_containers(
    sources: &ContainerSources,
    counterparties: &Counterparties,
) -> (BTreeMap<CounterpartyRef, ContainerBalances>, usize) {
    let mut events = sources.events();
    let folded = fold_container_events(&mut events);
    let staged = counterparties
        .keys()
        .map(|counterparty| {
            let balances = folded.get(counterparty).cloned().unwrap_or_default();
            (counterparty.clone(), balances)
        })
        .collect();
    (staged, events.len())
}

pub fn money_writes(stage: &MoneyStage, counterparties: &Counterparties) -> Vec<StagedWrite> {
    stage
        .balances
        .iter()
        .filter_map(|(counterparty, staged)| {
            let stored = counterparties.get(counterparty)?;
            let current = stored.record.current_money_balance;
            Some(StagedWrite {
                target: WriteTarget::Counterparty(counterparty.clone()),
                patch: json!({ "current_money_balance": staged }),
                current: json!({ "current_money_balance": current }),
                unchanged: current == *staged,
            })
        })
        .collect()
}

/// Running-balance writes for the threaded entries, optionally limited to a
/// set of counterparties.
pub fn running_writes(
    stage: &MoneyStage,
    entries: &[Stored<LedgerEntry>],
    only: Option<&BTreeSet<CounterpartyRef>>,
) -> Vec<StagedWrite> {
    let cached: BTreeMap<_, _> = entries
        .iter()
        .map(|entry| (&entry.id, entry.record.running_balance))
        .collect();
    stage
        .threads
        .iter()
        .filter(|(counterparty, _)| only.map_or(true, |set| set.contains(*counterparty)))
        .flat_map(|(_, thread)| thread.running.iter())
        .map(|(id, staged)| {
            let current = cached.get(id).copied().flatten();
            StagedWrite {
                target: WriteTarget::Entry(id.clone()),
                patch: json!({ "running_balance": staged }),
                current: json!({ "running_balance": current }),
                unchanged: current == Some(*staged),
            }
        })
        .collect()
}

pub fn container_writes(
    staged: &BTreeMap<CounterpartyRef, ContainerBalances>,
    counterparties: &Counterparties,
) -> Vec<StagedWrite> {
    staged
        .iter()
        .filter_map(|(counterparty, balances)| {
            let stored = counterparties.get(counterparty)?;
            let current = &stored.record.container_balances;
            Some(StagedWrite {
                target: WriteTarget::Counterparty(counterparty.clone()),
                patch: json!({ "container_balances": balances.to_value() }),
                current: json!({ "container_balances": current.to_value() }),
                unchanged: current == balances,
            })
        })
        .collect()
}

/// A fully staged replay, ready to write.
#[derive(Clone, Debug)]
pub struct Prepared {
    pub operation: String,
    /// Digest of the records the replay derives from.
    pub inputs: Digest,
    pub writes: Vec<StagedWrite>,
    pub records_scanned: usize,
    pub events_processed: usize,
}

impl Prepared {
    /// Digest of the inputs with the state as it is stored right now.
    pub fn observed_state(&self) -> ReconcileResult<Digest> {
        self.state_digest(|write| {
            if write.unchanged {
                &write.patch
            } else {
                &write.current
            }
        })
    }

    /// Digest of the inputs with the staged state, i.e. what
    /// [`Prepared::observed_state`] returns once every write has landed.
    pub fn settled_state(&self) -> ReconcileResult<Digest> {
        self.state_digest(|write| &write.patch)
    }

    pub fn pending(&self) -> usize {
        self.writes.iter().filter(|w| !w.unchanged).count()
    }

    fn state_digest<'w>(
        &'w self,
        pick: impl Fn(&'w StagedWrite) -> &'w serde_json::Value,
    ) -> ReconcileResult<Digest> {
        let mut builder = DigestBuilder::new(&self.operation);
        builder.item(self.inputs.as_str())?;
        for write in &self.writes {
            builder.item(&(&write.target, pick(write)))?;
        }
        Ok(builder.finish())
    }

    pub fn checkpoint_key(&self) -> CheckpointKey {
        CheckpointKey {
            operation: self.operation.clone(),
            input_digest: self.inputs.clone(),
        }
    }
}

/// Full chronological replay of source history into the cached balances.
///
/// Every replay stages its complete result before touching a live record,
/// then writes counterparties in ascending order.
pub struct ReplayEngine<'a, S: ?Sized> {
    store: &'a S,
    config: ReconcileConfig,
}

impl<'a, S: RecordStore + ?Sized> ReplayEngine<'a, S> {
    pub fn new(store: &'a S, config: ReconcileConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Rewrite every counterparty's money balance from the ledger and, when
    /// configured, every entry's running balance.
    pub async fn recompute_all_money_balances(&self) -> ReconcileResult<ReplaySummary> {
        let prepared = self
            .prepare_money(self.config.thread_running_balances)
            .await?;
        self.execute(&prepared, None).await
    }

    /// Rethread the running balances of one counterparty's entries.
    pub async fn recompute_running_balances(
        &self,
        counterparty: &CounterpartyRef,
    ) -> ReconcileResult<ReplaySummary> {
        let entries = load_counterparty_ledger(self.store, &self.config.fetch, counterparty).await?;
        let thread = thread_entries(&entries);
        let stage = MoneyStage {
            balances: BTreeMap::new(),
            threads: BTreeMap::from([(counterparty.clone(), thread)]),
        };

        let operation = format!("{}:{counterparty}", CorrectionKind::RethreadRunningBalances);
        let mut builder = DigestBuilder::new(&operation);
        digest_ledger(&entries, &mut builder)?;
        let prepared = Prepared {
            operation,
            inputs: builder.finish(),
            writes: running_writes(&stage, &entries, None),
            records_scanned: entries.len(),
            events_processed: entries.iter().filter(|e| !e.record.voided).count(),
        };
        self.execute(&prepared, None).await
    }

    /// Rewrite every counterparty's container map from packaging movements,
    /// goods receipts and confirmed shipments.
    pub async fn recompute_all_container_balances(&self) -> ReconcileResult<ReplaySummary> {
        let prepared = self.prepare_containers().await?;
        self.execute(&prepared, None).await
    }

    pub async fn prepare_money(&self, with_running: bool) -> ReconcileResult<Prepared> {
        let counterparties = load_counterparties(self.store, &self.config.fetch).await?;
        let entries = load_ledger(self.store, &self.config.fetch).await?;
        let operation = CorrectionKind::ResyncMoneyBalances.to_string();
        self.prepare_money_from(&operation, &entries, &counterparties, with_running, None)
    }

    pub async fn prepare_rethread(&self) -> ReconcileResult<Prepared> {
        let counterparties = load_counterparties(self.store, &self.config.fetch).await?;
        let entries = load_ledger(self.store, &self.config.fetch).await?;
        let stage = stage_money(&entries, &counterparties);

        let operation = CorrectionKind::RethreadRunningBalances.to_string();
        let mut builder = DigestBuilder::new(&operation);
        digest_ledger(&entries, &mut builder)?;
        Ok(Prepared {
            operation,
            inputs: builder.finish(),
            writes: running_writes(&stage, &entries, None),
            records_scanned: entries.len(),
            events_processed: stage.threads.values().map(|t| t.running.len()).sum(),
        })
    }

    pub async fn prepare_containers(&self) -> ReconcileResult<Prepared> {
        let counterparties = load_counterparties(self.store, &self.config.fetch).await?;
        let sources = ContainerSources::load(self.store, &self.config.fetch).await?;
        let (staged, events) = stage_containers(&sources, &counterparties);

        let operation = CorrectionKind::RebuildContainerBalances.to_string();
        let mut builder = DigestBuilder::new(&operation);
        digest_counterparty_set(&counterparties, &mut builder)?;
        sources.digest_into(&mut builder)?;
        Ok(Prepared {
            operation,
            inputs: builder.finish(),
            writes: container_writes(&staged, &counterparties),
            records_scanned: sources.records(),
            events_processed: events,
        })
    }

    /// Stage money (and optionally running balances) from already loaded
    /// history. `only` restricts the writes to some counterparties.
    pub fn prepare_money_from(
        &self,
        operation: &str,
        entries: &[Stored<LedgerEntry>],
        counterparties: &Counterparties,
        with_running: bool,
        only: Option<&BTreeSet<CounterpartyRef>>,
    ) -> ReconcileResult<Prepared> {
        let stage = stage_money(entries, counterparties);

        let mut builder = DigestBuilder::new(operation);
        digest_counterparty_set(counterparties, &mut builder)?;
        digest_ledger(entries, &mut builder)?;

        let mut writes: Vec<StagedWrite> = money_writes(&stage, counterparties)
            .into_iter()
            .filter(|write| match (&write.target, only) {
                (WriteTarget::Counterparty(counterparty), Some(set)) => set.contains(counterparty),
                _ => true,
            })
            .collect();
        if with_running {
            writes.extend(running_writes(&stage, entries, only));
        }

        Ok(Prepared {
            operation: operation.to_string(),
            inputs: builder.finish(),
            writes,
            records_scanned: entries.len(),
            events_processed: entries.iter().filter(|e| !e.record.voided).count(),
        })
    }

    /// Apply a prepared replay. With a checkpoint key, progress survives a
    /// failed run and the next run with the same inputs resumes.
    pub async fn execute(
        &self,
        prepared: &Prepared,
        checkpoint: Option<CheckpointKey>,
    ) -> ReconcileResult<ReplaySummary> {
        let mut writer = BatchWriter::new(self.store, &self.config);
        if let Some(key) = checkpoint {
            writer = writer.with_checkpoint(key);
        }
        let report = writer.apply(&prepared.writes).await?;

        let summary = ReplaySummary {
            records_scanned: prepared.records_scanned,
            events_processed: prepared.events_processed,
            counterparties_updated: report.counterparties_written,
            counterparties_unchanged: report.counterparties_unchanged,
            entries_rethreaded: report.entries_written,
            entries_unchanged: report.entries_unchanged,
            entries_removed: 0,
            resumed_from: report.resumed_from,
        };
        info!(
            operation = %prepared.operation,
            scanned = summary.records_scanned,
            events = summary.events_processed,
            updated = summary.counterparties_updated,
            unchanged = summary.counterparties_unchanged,
            rethreaded = summary.entries_rethreaded,
            "replay complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use tally_ledger::{AdjusterConfig, LedgerRecorder, NewEntry, PostingService};
    use tally_store::{create_record, get_counterparty, get_record, FaultPlan, InMemoryRecordStore};
    use tally_types::{
        Collection, ContainerLine, Direction, Flow, GoodsReceipt, PackagingLine, PackagingMovement,
        Shipment,
    };

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, d).unwrap()
    }

    async fn supplier(store: &InMemoryRecordStore, name: &str) -> CounterpartyRef {
        let doc = store
            .create(Collection::Suppliers, json!({ "name": name }))
            .await
            .unwrap();
        CounterpartyRef::supplier(doc.id)
    }

    async fn customer(store: &InMemoryRecordStore, name: &str) -> CounterpartyRef {
        let doc = store
            .create(Collection::Customers, json!({ "name": name }))
            .await
            .unwrap();
        CounterpartyRef::customer(doc.id)
    }

    async fn money(store: &InMemoryRecordStore, cp: &CounterpartyRef) -> Decimal {
        get_counterparty(store, cp)
            .await
            .unwrap()
            .unwrap()
            .record
            .current_money_balance
    }

    async fn containers(store: &InMemoryRecordStore, cp: &CounterpartyRef) -> ContainerBalances {
        get_counterparty(store, cp)
            .await
            .unwrap()
            .unwrap()
            .record
            .container_balances
    }

    async fn running_balance(
        store: &InMemoryRecordStore,
        id: &tally_types::RecordId,
    ) -> Option<Decimal> {
        get_record::<LedgerEntry, _>(store, id)
            .await
            .unwrap()
            .unwrap()
            .record
            .running_balance
    }

    fn engine(store: &InMemoryRecordStore) -> ReplayEngine<'_, InMemoryRecordStore> {
        ReplayEngine::new(store, ReconcileConfig::unthrottled())
    }

    #[tokio::test]
    async fn money_replay_sums_credits_minus_debits() {
        let store = InMemoryRecordStore::new();
        let acme = supplier(&store, "Acme").await;
        let idle = supplier(&store, "Idle").await;
        let recorder = LedgerRecorder::new(&store);
        recorder
            .record(NewEntry::new(day(2), Direction::Debit, acme.clone(), dec!(400.00)))
            .await
            .unwrap();
        recorder
            .record(NewEntry::new(day(1), Direction::Credit, acme.clone(), dec!(1000.00)))
            .await
            .unwrap();
        store
            .update(
                Collection::Suppliers,
                &idle.id,
                json!({ "current_money_balance": "77.00" }),
                None,
            )
            .await
            .unwrap();

        let summary = engine(&store).recompute_all_money_balances().await.unwrap();
        assert_eq!(money(&store, &acme).await, dec!(600.00));
        assert_eq!(money(&store, &idle).await, Decimal::ZERO);
        assert_eq!(summary.records_scanned, 2);
        assert_eq!(summary.counterparties_updated, 2);

        let entries = load_ledger(&store, &ReconcileConfig::unthrottled().fetch)
            .await
            .unwrap();
        let mut running: Vec<(NaiveDate, Option<Decimal>)> = entries
            .iter()
            .map(|e| (e.record.date, e.record.running_balance))
            .collect();
        running.sort();
        assert_eq!(
            running,
            vec![(day(1), Some(dec!(1000.00))), (day(2), Some(dec!(600.00)))]
        );
    }

    #[tokio::test]
    async fn voided_entries_are_excluded() {
        let store = InMemoryRecordStore::new();
        let acme = supplier(&store, "Acme").await;
        let recorder = LedgerRecorder::new(&store);
        recorder
            .record(NewEntry::new(day(1), Direction::Credit, acme.clone(), dec!(10)))
            .await
            .unwrap();
        let mistake = recorder
            .record(NewEntry::new(day(2), Direction::Credit, acme.clone(), dec!(500)))
            .await
            .unwrap();
        recorder.void(mistake.id()).await.unwrap();

        engine(&store).recompute_all_money_balances().await.unwrap();
        assert_eq!(money(&store, &acme).await, dec!(10));
    }

    #[tokio::test]
    async fn second_replay_writes_nothing() {
        let store = InMemoryRecordStore::new();
        let acme = supplier(&store, "Acme").await;
        LedgerRecorder::new(&store)
            .record(NewEntry::new(day(1), Direction::Credit, acme.clone(), dec!(12.34)))
            .await
            .unwrap();

        let engine = engine(&store);
        engine.recompute_all_money_balances().await.unwrap();
        let again = engine.recompute_all_money_balances().await.unwrap();
        assert_eq!(again.counterparties_updated, 0);
        assert_eq!(again.counterparties_unchanged, 1);
        assert_eq!(again.entries_rethreaded, 0);
        assert_eq!(money(&store, &acme).await, dec!(12.34));
    }

    #[tokio::test]
    async fn container_replay_scenarios() {
        let store = InMemoryRecordStore::new();
        let farm = supplier(&store, "Farm").await;
        let grocer = customer(&store, "Grocer").await;
        let bistro = customer(&store, "Bistro").await;

        for (d, qty, flow) in [(1, 50, Flow::Egress), (3, 20, Flow::Ingress)] {
            create_record(
                &store,
                PackagingMovement {
                    date: day(d),
                    counterparty: bistro.clone(),
                    lines: vec![PackagingLine {
                        container_type: "Bin-20kg".into(),
                        quantity: qty,
                        flow,
                    }],
                    notes: String::new(),
                },
            )
            .await
            .unwrap();
        }
        for confirmed in [true, false] {
            create_record(
                &store,
                Shipment {
                    date: day(2),
                    customer_id: grocer.id.clone(),
                    confirmed,
                    debt: Decimal::ZERO,
                    product_id: None,
                    net_stock: 0,
                    full_containers: vec![ContainerLine {
                        container_type: "Crate".into(),
                        quantity: 10,
                    }],
                },
            )
            .await
            .unwrap();
        }
        create_record(
            &store,
            GoodsReceipt {
                date: day(2),
                supplier_id: farm.id.clone(),
                debt: Decimal::ZERO,
                product_id: None,
                net_stock: 0,
                full_containers: vec![ContainerLine {
                    container_type: "Crate".into(),
                    quantity: 5,
                }],
            },
        )
        .await
        .unwrap();

        let summary = engine(&store).recompute_all_container_balances().await.unwrap();
        assert_eq!(containers(&store, &bistro).await.get("Bin-20kg"), 30);
        assert_eq!(containers(&store, &grocer).await.get("Crate"), 10);
        assert_eq!(containers(&store, &farm).await.get("Crate"), -5);
        assert_eq!(summary.records_scanned, 4);
        assert_eq!(summary.events_processed, 4);
    }

    #[tokio::test]
    async fn malformed_container_map_is_rebuilt() {
        let store = InMemoryRecordStore::new();
        let grocer = customer(&store, "Grocer").await;
        store
            .update(
                Collection::Customers,
                &grocer.id,
                json!({ "container_balances": "{not json" }),
                None,
            )
            .await
            .unwrap();

        let summary = engine(&store).recompute_all_container_balances().await.unwrap();
        // An unreadable map reads as empty, which is also the derived value.
        assert_eq!(summary.counterparties_unchanged, 1);
        assert!(containers(&store, &grocer).await.is_empty());
    }

    #[tokio::test]
    async fn failed_write_keeps_later_counterparties_at_prior_values() {
        let store = InMemoryRecordStore::new();
        let a = supplier(&store, "A").await;
        let b = supplier(&store, "B").await;
        let c = supplier(&store, "C").await;
        for cp in [&a, &b, &c] {
            store
                .update(
                    cp.collection(),
                    &cp.id,
                    json!({ "current_money_balance": "5.00" }),
                    None,
                )
                .await
                .unwrap();
        }

        let config = ReconcileConfig {
            thread_running_balances: false,
            checkpoint_every: 0,
            ..ReconcileConfig::unthrottled()
        };
        store.set_faults(FaultPlan {
            fail_writes_after: Some(1),
            ..FaultPlan::default()
        });
        let engine = ReplayEngine::new(&store, config);
        assert!(engine.recompute_all_money_balances().await.is_err());

        store.set_faults(FaultPlan::default());
        assert_eq!(money(&store, &a).await, Decimal::ZERO);
        assert_eq!(money(&store, &b).await, dec!(5.00));
        assert_eq!(money(&store, &c).await, dec!(5.00));

        engine.recompute_all_money_balances().await.unwrap();
        for cp in [&a, &b, &c] {
            assert_eq!(money(&store, cp).await, Decimal::ZERO);
        }
    }

    #[tokio::test]
    async fn rethread_one_counterparty_after_backdated_entry() {
        let store = InMemoryRecordStore::new();
        let acme = supplier(&store, "Acme").await;
        let recorder = LedgerRecorder::new(&store);
        let later = recorder
            .record(NewEntry::new(day(5), Direction::Credit, acme.clone(), dec!(100)))
            .await
            .unwrap();
        let earlier = recorder
            .record(NewEntry::new(day(1), Direction::Credit, acme.clone(), dec!(40)))
            .await
            .unwrap();

        assert_eq!(running_balance(&store, earlier.id()).await, Some(dec!(40)));
        assert_eq!(running_balance(&store, later.id()).await, None);

        let summary = engine(&store).recompute_running_balances(&acme).await.unwrap();
        assert_eq!(summary.entries_rethreaded, 1);
        assert_eq!(summary.entries_unchanged, 1);

        assert_eq!(running_balance(&store, earlier.id()).await, Some(dec!(40)));
        assert_eq!(running_balance(&store, later.id()).await, Some(dec!(140)));
    }

    #[tokio::test]
    async fn incremental_posting_matches_replay() {
        let store = InMemoryRecordStore::new();
        let farm = supplier(&store, "Farm").await;
        let grocer = customer(&store, "Grocer").await;
        let posting = PostingService::new(&store, AdjusterConfig::default());

        posting
            .post_goods_receipt(GoodsReceipt {
                date: day(1),
                supplier_id: farm.id.clone(),
                debt: dec!(300.10),
                product_id: None,
                net_stock: 0,
                full_containers: vec![ContainerLine {
                    container_type: "Crate".into(),
                    quantity: 8,
                }],
            })
            .await
            .unwrap();
        posting
            .post_shipment(Shipment {
                date: day(2),
                customer_id: grocer.id.clone(),
                confirmed: true,
                debt: dec!(120.55),
                product_id: None,
                net_stock: 0,
                full_containers: vec![ContainerLine {
                    container_type: "Crate".into(),
                    quantity: 6,
                }],
            })
            .await
            .unwrap();
        posting
            .post_packaging_movement(PackagingMovement {
                date: day(3),
                counterparty: grocer.clone(),
                lines: vec![PackagingLine {
                    container_type: "Crate".into(),
                    quantity: 4,
                    flow: Flow::Ingress,
                }],
                notes: String::new(),
            })
            .await
            .unwrap();
        posting
            .post_treasury(farm.clone(), Direction::Debit, dec!(100.10), day(4), "payment")
            .await
            .unwrap();

        let engine = engine(&store);
        let money_summary = engine.recompute_all_money_balances().await.unwrap();
        let container_summary = engine.recompute_all_container_balances().await.unwrap();
        assert_eq!(money_summary.counterparties_updated, 0);
        assert_eq!(money_summary.entries_rethreaded, 0);
        assert_eq!(container_summary.counterparties_updated, 0);
        assert_eq!(money(&store, &farm).await, dec!(200.00));
        assert_eq!(containers(&store, &grocer).await.get("Crate"), 2);
    }

    fn arb_entries() -> impl Strategy<Value = Vec<(u32, bool, u8, i64, u32)>> {
        prop::collection::vec(
            (1u32..28, any::<bool>(), 0u8..3, 0i64..10_000_000, 2u32..5),
            0..25,
        )
    }

    fn arb_postings() -> impl Strategy<Value = Vec<(u32, bool, i64, u32)>> {
        prop::collection::vec((1u32..28, any::<bool>(), 0i64..1_000_000, 2u32..5), 1..12)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn money_stage_is_rounded_signed_sum(raw in arb_entries()) {
            let mut counterparties = Counterparties::new();
            for i in 0..3u8 {
                let cp = CounterpartyRef::customer(format!("c{i}"));
                counterparties.insert(cp.clone(), Stored {
                    id: cp.id.clone(),
                    version: 1,
                    record: tally_types::Counterparty::named(format!("c{i}")),
                });
            }
            let entries: Vec<Stored<LedgerEntry>> = raw
                .iter()
                .enumerate()
                .map(|(i, (d, credit, who, units, scale))| Stored {
                    id: format!("{i:08}").into(),
                    version: 1,
                    record: LedgerEntry {
                        date: day(*d),
                        direction: if *credit { Direction::Credit } else { Direction::Debit },
                        counterparty: CounterpartyRef::customer(format!("c{who}")),
                        amount: Decimal::new(*units, *scale),
                        concept: String::new(),
                        source: None,
                        running_balance: None,
                        voided: false,
                    },
                })
                .collect();

            let stage = stage_money(&entries, &counterparties);
            prop_assert_eq!(stage.balances.len(), 3);
            for (cp, balance) in &stage.balances {
                let expected: Decimal = entries
                    .iter()
                    .filter(|e| &e.record.counterparty == cp)
                    .map(|e| e.record.signed_amount())
                    .sum();
                prop_assert_eq!(*balance, tally_types::round_money(expected));
            }
        }

        #[test]
        fn incremental_posting_matches_replay_for_sub_cent_amounts(raw in arb_postings()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (incremental, expected, replayed, updated) = runtime.block_on(async {
                let store = InMemoryRecordStore::new();
                let acme = supplier(&store, "Acme").await;
                let posting = PostingService::new(&store, AdjusterConfig::default());
                for (d, credit, units, scale) in &raw {
                    let direction = if *credit { Direction::Credit } else { Direction::Debit };
                    posting
                        .post_treasury(
                            acme.clone(),
                            direction,
                            Decimal::new(*units, *scale),
                            day(*d),
                            "treasury",
                        )
                        .await
                        .unwrap();
                }
                let incremental = money(&store, &acme).await;
                let entries = load_ledger(&store, &ReconcileConfig::unthrottled().fetch)
                    .await
                    .unwrap();
                let expected = tally_types::round_money(
                    entries.iter().map(|e| e.record.signed_amount()).sum::<Decimal>(),
                );
                let summary = engine(&store).recompute_all_money_balances().await.unwrap();
                (
                    incremental,
                    expected,
                    money(&store, &acme).await,
                    summary.counterparties_updated,
                )
            });
            prop_assert_eq!(incremental, expected);
            prop_assert_eq!(replayed, expected);
            prop_assert_eq!(updated, 0);
        }
    }
}
