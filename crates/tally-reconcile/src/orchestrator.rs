use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use tally_store::{create_record, fetch_all_records, Filter, OrderKey, Record, RecordStore, Stored};
use tally_types::{Collection, CounterpartyRef, LedgerEntry, RecordId, SourceRef};

use crate::config::ReconcileConfig;
use crate::digest::{Digest, DigestBuilder};
use crate::error::{ReconcileError, ReconcileResult};
use crate::history::{digest_ledger, load_counterparties, load_ledger};
use crate::replay::{Prepared, ReplayEngine, ReplaySummary};

const DEDUPE_PREFIX: &str = "dedupe-ledger:";

/// The fixed catalog of repair operations.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CorrectionKind {
    /// Recompute every counterparty's money balance from the ledger.
    ResyncMoneyBalances,
    /// Recompute every entry's cached running balance.
    RethreadRunningBalances,
    /// Recompute every counterparty's container map.
    RebuildContainerBalances,
    /// Remove duplicate entries posted for the same source document of the
    /// given type, then resync the affected counterparties.
    DedupeLedger(String),
}

impl CorrectionKind {
    /// Every operation an operator can run, with the dedupe operation listed
    /// once per source type the posting service produces.
    pub fn catalog() -> Vec<Self> {
        vec![
            Self::ResyncMoneyBalances,
            Self::RethreadRunningBalances,
            Self::RebuildContainerBalances,
            Self::DedupeLedger(SourceRef::GOODS_RECEIPT.to_string()),
            Self::DedupeLedger(SourceRef::SHIPMENT.to_string()),
        ]
    }

    pub fn description(&self) -> String {
        match self {
            Self::ResyncMoneyBalances => {
                "recompute money balances (and running balances) from the ledger".into()
            }
            Self::RethreadRunningBalances => "recompute cached per-entry running balances".into(),
            Self::RebuildContainerBalances => {
                "recompute container balances from movements, receipts and shipments".into()
            }
            Self::DedupeLedger(doc_type) => {
                format!("remove duplicate ledger entries for {doc_type} sources")
            }
        }
    }
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResyncMoneyBalances => f.write_str("resync-money-balances"),
            Self::RethreadRunningBalances => f.write_str("rethread-running-balances"),
            Self::RebuildContainerBalances => f.write_str("rebuild-container-balances"),
            Self::DedupeLedger(doc_type) => write!(f, "{DEDUPE_PREFIX}{doc_type}"),
        }
    }
}

impl FromStr for CorrectionKind {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resync-money-balances" => Ok(Self::ResyncMoneyBalances),
            "rethread-running-balances" => Ok(Self::RethreadRunningBalances),
            "rebuild-container-balances" => Ok(Self::RebuildContainerBalances),
            other => match other.strip_prefix(DEDUPE_PREFIX) {
                Some(doc_type) if !doc_type.is_empty() => Ok(Self::DedupeLedger(doc_type.into())),
                _ => Err(ReconcileError::UnknownOperation(s.to_string())),
            },
        }
    }
}

/// Whether a correction may be skipped when nothing changed since its last run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Skip when a completed run recorded the same inputs and state.
    IfChanged,
    /// Always run.
    Force,
}

/// Completion marker of one correction run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRun {
    pub run_id: Uuid,
    pub operation: String,
    /// Digest of the records the operation derived from.
    pub input_digest: Digest,
    /// Digest of inputs and the state the run left behind. A later run that
    /// observes the same digest has nothing to do.
    pub state_digest: Digest,
    pub forced: bool,
    pub completed_at: DateTime<Utc>,
    pub summary: ReplaySummary,
}

impl Record for CorrectionRun {
    const COLLECTION: Collection = Collection::CorrectionRuns;
}

#[derive(Clone, Debug, PartialEq)]
pub enum CorrectionOutcome {
    Applied(Stored<CorrectionRun>),
    /// A previous run already left the store in the derived state.
    Skipped { previous: Stored<CorrectionRun> },
}

impl CorrectionOutcome {
    pub fn run(&self) -> &Stored<CorrectionRun> {
        match self {
            Self::Applied(run) | Self::Skipped { previous: run } => run,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Runs catalog operations on explicit request and records their completion.
pub struct CorrectionOrchestrator<'a, S: ?Sized> {
    store: &'a S,
    engine: ReplayEngine<'a, S>,
}

impl<'a, S: RecordStore + ?Sized> CorrectionOrchestrator<'a, S> {
    pub fn new(store: &'a S, config: ReconcileConfig) -> Self {
        Self {
            store,
            engine: ReplayEngine::new(store, config),
        }
    }

    pub fn engine(&self) -> &ReplayEngine<'a, S> {
        &self.engine
    }

    pub async fn run(
        &self,
        kind: &CorrectionKind,
        mode: RunMode,
    ) -> ReconcileResult<CorrectionOutcome> {
        let prepared = match kind {
            CorrectionKind::ResyncMoneyBalances => {
                let with_running = self.engine.config().thread_running_balances;
                self.engine.prepare_money(with_running).await?
            }
            CorrectionKind::RethreadRunningBalances => self.engine.prepare_rethread().await?,
            CorrectionKind::RebuildContainerBalances => self.engine.prepare_containers().await?,
            CorrectionKind::DedupeLedger(doc_type) => return self.dedupe(kind, doc_type, mode).await,
        };

        let observed = prepared.observed_state()?;
        if let Some(previous) = self.skip_check(kind, mode, &observed).await? {
            return Ok(CorrectionOutcome::Skipped { previous });
        }

        info!(
            operation = %kind,
            inputs = prepared.inputs.short(),
            pending = prepared.pending(),
            "running correction"
        );
        let summary = self
            .engine
            .execute(&prepared, Some(prepared.checkpoint_key()))
            .await?;
        let run = self
            .record(kind, mode, &prepared, prepared.settled_state()?, summary)
            .await?;
        Ok(CorrectionOutcome::Applied(run))
    }

    /// Every recorded run, oldest first.
    pub async fn history(&self) -> ReconcileResult<Vec<Stored<CorrectionRun>>> {
        Ok(fetch_all_records(
            self.store,
            None,
            &OrderKey::asc("completed_at"),
            &self.engine.config().fetch,
        )
        .await?)
    }

    /// The most recent run of an operation, if any.
    pub async fn last_run(
        &self,
        kind: &CorrectionKind,
    ) -> ReconcileResult<Option<Stored<CorrectionRun>>> {
        let filter = Filter::new().eq("operation", kind.to_string());
        self.latest_matching(&filter).await
    }

    async fn dedupe(
        &self,
        kind: &CorrectionKind,
        doc_type: &str,
        mode: RunMode,
    ) -> ReconcileResult<CorrectionOutcome> {
        let operation = kind.to_string();
        let config = self.engine.config();
        let counterparties = load_counterparties(self.store, &config.fetch).await?;
        let entries = load_ledger(self.store, &config.fetch).await?;

        let observed = ledger_state(&operation, &entries)?;
        if let Some(previous) = self.skip_check(kind, mode, &observed).await? {
            return Ok(CorrectionOutcome::Skipped { previous });
        }

        let duplicates = find_duplicates(&entries, doc_type);
        let removed: BTreeSet<RecordId> = duplicates.keys().cloned().collect();
        info!(operation = %kind, duplicates = removed.len(), "removing duplicate ledger entries");
        for (index, id) in removed.iter().enumerate() {
            if index > 0 && config.write_delay_ms > 0 {
                tokio::time::sleep(config.write_delay()).await;
            }
            let deleted = self.store.delete(Collection::LedgerEntries, id).await?;
            debug!(entry_id = %id, deleted, "duplicate ledger entry removed");
        }

        let affected: BTreeSet<CounterpartyRef> = duplicates.into_values().collect();
        let remaining: Vec<Stored<LedgerEntry>> = entries
            .into_iter()
            .filter(|entry| !removed.contains(&entry.id))
            .collect();

        let prepared = self.engine.prepare_money_from(
            &operation,
            &remaining,
            &counterparties,
            true,
            Some(&affected),
        )?;
        let mut summary = self
            .engine
            .execute(&prepared, Some(prepared.checkpoint_key()))
            .await?;
        summary.entries_removed = removed.len();

        let settled = ledger_state(&operation, &remaining)?;
        let run = self.record(kind, mode, &prepared, settled, summary).await?;
        Ok(CorrectionOutcome::Applied(run))
    }

    async fn skip_check(
        &self,
        kind: &CorrectionKind,
        mode: RunMode,
        observed: &Digest,
    ) -> ReconcileResult<Option<Stored<CorrectionRun>>> {
        if mode == RunMode::Force {
            return Ok(None);
        }
        let filter = Filter::new()
            .eq("operation", kind.to_string())
            .eq("state_digest", observed.as_str());
        let previous = self.latest_matching(&filter).await?;
        if let Some(run) = &previous {
            info!(
                operation = %kind,
                state = observed.short(),
                previous_run = %run.record.run_id,
                "nothing changed since last run; skipping"
            );
        }
        Ok(previous)
    }

    async fn latest_matching(
        &self,
        filter: &Filter,
    ) -> ReconcileResult<Option<Stored<CorrectionRun>>> {
        let page = self
            .store
            .filter(
                Collection::CorrectionRuns,
                filter,
                &OrderKey::desc("completed_at"),
                1,
                0,
            )
            .await?;
        match page.first() {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    async fn record(
        &self,
        kind: &CorrectionKind,
        mode: RunMode,
        prepared: &Prepared,
        state_digest: Digest,
        summary: ReplaySummary,
    ) -> ReconcileResult<Stored<CorrectionRun>> {
        let run = create_record(
            self.store,
            CorrectionRun {
                run_id: Uuid::now_v7(),
                operation: kind.to_string(),
                input_digest: prepared.inputs.clone(),
                state_digest,
                forced: mode == RunMode::Force,
                completed_at: Utc::now(),
                summary,
            },
        )
        .await?;
        info!(
            operation = %kind,
            run_id = %run.record.run_id,
            updated = run.record.summary.counterparties_updated,
            rethreaded = run.record.summary.entries_rethreaded,
            removed = run.record.summary.entries_removed,
            "correction recorded"
        );
        Ok(run)
    }
}

/// Duplicate entries for sources of `doc_type`, mapped to their
/// counterparty. Among non-voided entries sharing a source id the earliest by
/// `(date, id)` is kept.
pub fn find_duplicates(
    entries: &[Stored<LedgerEntry>],
    doc_type: &str,
) -> BTreeMap<RecordId, CounterpartyRef> {
    let mut by_source: BTreeMap<&RecordId, Vec<&Stored<LedgerEntry>>> = BTreeMap::new();
    for entry in entries {
        if entry.record.voided {
            continue;
        }
        if let Some(source) = &entry.record.source {
            if source.doc_type == doc_type {
                by_source.entry(&source.id).or_default().push(entry);
            }
        }
    }

    let mut duplicates = BTreeMap::new();
    for group in by_source.into_values() {
        if group.len() < 2 {
            continue;
        }
        let keep = group
            .iter()
            .min_by(|a, b| (a.record.date, &a.id).cmp(&(b.record.date, &b.id)))
            .map(|entry| entry.id.clone());
        for entry in group {
            if Some(&entry.id) != keep.as_ref() {
                duplicates.insert(entry.id.clone(), entry.record.counterparty.clone());
            }
        }
    }
    duplicates
}

fn ledger_state(operation: &str, entries: &[Stored<LedgerEntry>]) -> ReconcileResult<Digest> {
    let mut builder = DigestBuilder::new(operation);
    digest_ledger(entries, &mut builder)?;
    Ok(builder.finish())
}
