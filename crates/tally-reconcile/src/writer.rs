//! Applying staged state to live records.
//!
//! Replays compute their complete result first and hand it here as an ordered
//! list of [`StagedWrite`]s. Writes go out one at a time with a pause between
//! them. Progress can be checkpointed in `job_checkpoints`, so a run that dies
//! part way resumes after the last recorded write instead of starting over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use tally_store::{create_record, Filter, OrderKey, Record, RecordStore, StoreError};
use tally_types::{Collection, CounterpartyRef, RecordId};

use crate::config::ReconcileConfig;
use crate::digest::Digest;
use crate::error::ReconcileResult;

/// The live record a staged value belongs to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum WriteTarget {
    Counterparty(CounterpartyRef),
    Entry(RecordId),
}

impl WriteTarget {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Counterparty(counterparty) => counterparty.collection(),
            Self::Entry(_) => Collection::LedgerEntries,
        }
    }

    pub fn id(&self) -> &RecordId {
        match self {
            Self::Counterparty(counterparty) => &counterparty.id,
            Self::Entry(id) => id,
        }
    }
}

/// One staged field patch together with the value it replaces.
#[derive(Clone, Debug, PartialEq)]
pub struct StagedWrite {
    pub target: WriteTarget,
    pub patch: Value,
    pub current: Value,
    /// The stored value already equals the staged one; nothing is written.
    pub unchanged: bool,
}

/// Counts produced by [`BatchWriter::apply`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub counterparties_written: usize,
    pub counterparties_unchanged: usize,
    pub entries_written: usize,
    pub entries_unchanged: usize,
    /// Targets deleted between staging and writing.
    pub targets_missing: usize,
    /// Staged writes skipped because a checkpoint showed them done.
    pub resumed_from: usize,
}

impl WriteReport {
    fn count(&mut self, target: &WriteTarget, written: bool) {
        match (target, written) {
            (WriteTarget::Counterparty(_), true) => self.counterparties_written += 1,
            (WriteTarget::Counterparty(_), false) => self.counterparties_unchanged += 1,
            (WriteTarget::Entry(_), true) => self.entries_written += 1,
            (WriteTarget::Entry(_), false) => self.entries_unchanged += 1,
        }
    }
}

/// Persisted write cursor for one operation over one set of inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub operation: String,
    pub input_digest: Digest,
    /// Length of the staged write list the cursor refers to.
    pub planned: usize,
    /// Staged writes `0..written_through` are done.
    pub written_through: usize,
    pub updated_at: DateTime<Utc>,
}

impl Record for JobCheckpoint {
    const COLLECTION: Collection = Collection::JobCheckpoints;
}

/// Identifies the checkpoint a write run reads and maintains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointKey {
    pub operation: String,
    pub input_digest: Digest,
}

/// Applies staged writes in order, pacing and checkpointing as configured.
pub struct BatchWriter<'a, S: ?Sized> {
    store: &'a S,
    config: &'a ReconcileConfig,
    checkpoint: Option<CheckpointKey>,
}

impl<'a, S: RecordStore + ?Sized> BatchWriter<'a, S> {
    pub fn new(store: &'a S, config: &'a ReconcileConfig) -> Self {
        Self {
            store,
            config,
            checkpoint: None,
        }
    }

    #[must_use]
    pub fn with_checkpoint(mut self, key: CheckpointKey) -> Self {
        self.checkpoint = Some(key);
        self
    }

    /// Write every changed value. Unchanged values are only counted.
    ///
    /// There is no rollback. If a write fails, earlier targets keep their new
    /// values and later ones keep their old values.
    pub async fn apply(&self, writes: &[StagedWrite]) -> ReconcileResult<WriteReport> {
        let mut cursor = self.load_cursor(writes.len()).await?;
        let start = cursor.as_ref().map_or(0, |(_, done)| *done).min(writes.len());

        let mut report = WriteReport {
            resumed_from: start,
            ..WriteReport::default()
        };
        if start > 0 {
            info!(resumed_from = start, planned = writes.len(), "resuming from checkpoint");
        }

        let mut live_writes = 0usize;
        let mut since_checkpoint = 0usize;
        for (index, write) in writes.iter().enumerate().skip(start) {
            if write.unchanged {
                report.count(&write.target, false);
            } else {
                if live_writes > 0 && self.config.write_delay_ms > 0 {
                    tokio::time::sleep(self.config.write_delay()).await;
                }
                live_writes += 1;

                let collection = write.target.collection();
                let id = write.target.id();
                match self
                    .store
                    .update(collection, id, write.patch.clone(), None)
                    .await
                {
                    Ok(_) => {
                        debug!(%collection, %id, "staged value written");
                        report.count(&write.target, true);
                    }
                    Err(StoreError::NotFound { .. }) => {
                        warn!(%collection, %id, "write target vanished after staging");
                        report.targets_missing += 1;
                    }
                    Err(e) => {
                        warn!(%collection, %id, written_through = index, error = %e, "staged write failed");
                        if let Err(save) = self.save_cursor(&mut cursor, writes.len(), index).await {
                            warn!(error = %save, "could not record checkpoint after failure");
                        }
                        return Err(e.into());
                    }
                }
            }

            since_checkpoint += 1;
            let done = index + 1;
            if self.config.checkpoint_every > 0
                && since_checkpoint >= self.config.checkpoint_every
                && done < writes.len()
            {
                self.save_cursor(&mut cursor, writes.len(), done).await?;
                since_checkpoint = 0;
            }
        }

        if let Some((id, _)) = cursor {
            self.store.delete(Collection::JobCheckpoints, &id).await?;
        }
        Ok(report)
    }

    /// The saved cursor for this key, if it refers to a plan of the same size.
    async fn load_cursor(&self, planned: usize) -> ReconcileResult<Option<(RecordId, usize)>> {
        let Some(key) = &self.checkpoint else {
            return Ok(None);
        };
        let filter = Filter::new()
            .eq("operation", key.operation.as_str())
            .eq("input_digest", key.input_digest.as_str());
        let page = self
            .store
            .filter(Collection::JobCheckpoints, &filter, &OrderKey::by_id(), 1, 0)
            .await?;
        let Some(doc) = page.first() else {
            return Ok(None);
        };
        let saved = doc.decode::<JobCheckpoint>()?;
        if saved.record.planned != planned {
            warn!(
                operation = %key.operation,
                saved = saved.record.planned,
                planned,
                "checkpoint refers to a different plan; starting over"
            );
            return Ok(Some((saved.id, 0)));
        }
        Ok(Some((saved.id, saved.record.written_through)))
    }

    async fn save_cursor(
        &self,
        cursor: &mut Option<(RecordId, usize)>,
        planned: usize,
        written_through: usize,
    ) -> ReconcileResult<()> {
        let Some(key) = &self.checkpoint else {
            return Ok(());
        };
        match cursor {
            Some((id, done)) => {
                self.store
                    .update(
                        Collection::JobCheckpoints,
                        id,
                        json!({
                            "planned": planned,
                            "written_through": written_through,
                            "updated_at": Utc::now(),
                        }),
                        None,
                    )
                    .await?;
                *done = written_through;
            }
            None => {
                let stored = create_record(
                    self.store,
                    JobCheckpoint {
                        operation: key.operation.clone(),
                        input_digest: key.input_digest.clone(),
                        planned,
                        written_through,
                        updated_at: Utc::now(),
                    },
                )
                .await?;
                *cursor = Some((stored.id, written_through));
            }
        }
        debug!(operation = %key.operation, written_through, "checkpoint saved");
        Ok(())
    }
}
