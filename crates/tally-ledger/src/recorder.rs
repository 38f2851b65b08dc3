use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info};

use tally_store::{
    create_record, fetch_all_records, get_record, FetchConfig, Filter, OrderKey, RecordStore,
    StoreError, Stored,
};
use tally_types::{
    round_money, Collection, CounterpartyRef, Direction, LedgerEntry, RecordId, SourceRef,
};

use crate::error::{LedgerError, LedgerResult};

/// A ledger posting that has not been stored yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEntry {
    pub date: NaiveDate,
    pub direction: Direction,
    pub counterparty: CounterpartyRef,
    pub amount: Decimal,
    pub concept: String,
    pub source: Option<SourceRef>,
}

impl NewEntry {
    pub fn new(
        date: NaiveDate,
        direction: Direction,
        counterparty: CounterpartyRef,
        amount: Decimal,
    ) -> Self {
        Self {
            date,
            direction,
            counterparty,
            amount,
            concept: String::new(),
            source: None,
        }
    }

    #[must_use]
    pub fn concept(mut self, concept: impl Into<String>) -> Self {
        self.concept = concept.into();
        self
    }

    #[must_use]
    pub fn source(mut self, source: SourceRef) -> Self {
        self.source = Some(source);
        self
    }
}

/// Outcome of [`LedgerRecorder::record`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recorded {
    Created {
        id: RecordId,
        running_balance: Option<Decimal>,
        /// The entry is dated before existing entries. Their cached running
        /// balances were cleared and need a rethread.
        needs_rethread: bool,
    },
    /// An entry for the same source document already exists.
    Duplicate { id: RecordId },
}

impl Recorded {
    pub fn id(&self) -> &RecordId {
        match self {
            Self::Created { id, .. } | Self::Duplicate { id } => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

/// Outcome of [`LedgerRecorder::void`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoidOutcome {
    /// The entry was voided. Adding `reversal` to the counterparty's money
    /// balance removes the entry's contribution.
    Voided {
        counterparty: CounterpartyRef,
        reversal: Decimal,
    },
    AlreadyVoided,
    NotFound,
}

/// Creates ledger entries, at most one per source document.
///
/// Recording an entry never touches the counterparty's balance; pair it with
/// a money adjustment.
pub struct LedgerRecorder<'a, S: ?Sized> {
    store: &'a S,
    fetch: FetchConfig,
}

impl<'a, S: RecordStore + ?Sized> LedgerRecorder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            fetch: FetchConfig::default(),
        }
    }

    /// Paging used when loading a counterparty's ledger.
    #[must_use]
    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Find the entry posted for a source document, voided or not.
    pub async fn find_by_source(
        &self,
        source: &SourceRef,
    ) -> LedgerResult<Option<Stored<LedgerEntry>>> {
        let filter = Filter::new()
            .eq("source.doc_type", source.doc_type.as_str())
            .eq("source.id", source.id.as_str());
        let page = self
            .store
            .filter(Collection::LedgerEntries, &filter, &OrderKey::by_id(), 1, 0)
            .await?;
        match page.first() {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn record(&self, entry: NewEntry) -> LedgerResult<Recorded> {
        if entry.amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount(entry.amount));
        }

        if let Some(source) = &entry.source {
            if let Some(existing) = self.find_by_source(source).await? {
                debug!(
                    doc_type = %source.doc_type,
                    source_id = %source.id,
                    entry_id = %existing.id,
                    "ledger entry already recorded for source"
                );
                return Ok(Recorded::Duplicate { id: existing.id });
            }
        }

        let amount = round_money(entry.amount);
        let signed = entry.direction.signed(amount);

        // New ids sort after every existing id, so same-date entries come first.
        let ledger = self.ledger_of(&entry.counterparty).await?;
        let (earlier, later): (Vec<_>, Vec<_>) =
            ledger.into_iter().partition(|e| e.record.date <= entry.date);
        let prefix: Decimal = earlier.iter().map(|e| e.record.signed_amount()).sum();
        let running_balance = Some(round_money(prefix + signed));
        let needs_rethread = !later.is_empty();

        let stored = create_record(
            self.store,
            LedgerEntry {
                date: entry.date,
                direction: entry.direction,
                counterparty: entry.counterparty,
                amount,
                concept: entry.concept,
                source: entry.source,
                running_balance,
                voided: false,
            },
        )
        .await?;

        for stale in later.iter().filter(|e| e.record.running_balance.is_some()) {
            self.clear_running_balance(&stale.id).await?;
        }

        info!(
            entry_id = %stored.id,
            counterparty = %stored.record.counterparty,
            direction = %stored.record.direction,
            %amount,
            needs_rethread,
            "ledger entry recorded"
        );
        Ok(Recorded::Created {
            id: stored.id,
            running_balance,
            needs_rethread,
        })
    }

    /// Mark an entry voided. Voided entries stay in the ledger and keep
    /// blocking re-posting of their source.
    pub async fn void(&self, id: &RecordId) -> LedgerResult<VoidOutcome> {
        let Some(current) = get_record::<LedgerEntry, _>(self.store, id).await? else {
            return Ok(VoidOutcome::NotFound);
        };
        if current.record.voided {
            return Ok(VoidOutcome::AlreadyVoided);
        }

        self.store
            .update(
                Collection::LedgerEntries,
                id,
                json!({ "voided": true, "running_balance": null }),
                Some(current.version),
            )
            .await?;

        let reversal = -current.record.signed_amount();
        info!(entry_id = %id, counterparty = %current.record.counterparty, %reversal, "ledger entry voided");
        Ok(VoidOutcome::Voided {
            counterparty: current.record.counterparty,
            reversal,
        })
    }

    /// The counterparty's non-voided entries. Stored entries may lack the
    /// `voided` key, so voids are dropped after decoding.
    async fn ledger_of(
        &self,
        counterparty: &CounterpartyRef,
    ) -> LedgerResult<Vec<Stored<LedgerEntry>>> {
        let filter = Filter::new()
            .eq("counterparty.kind", counterparty.kind.as_str())
            .eq("counterparty.id", counterparty.id.as_str());
        let mut entries = fetch_all_records::<LedgerEntry, _>(
            self.store,
            Some(&filter),
            &OrderKey::by_id(),
            &self.fetch,
        )
        .await?;
        entries.retain(|e| !e.record.voided);
        Ok(entries)
    }

    async fn clear_running_balance(&self, id: &RecordId) -> LedgerResult<()> {
        match self
            .store
            .update(Collection::LedgerEntries, id, json!({ "running_balance": null }), None)
            .await
        {
            Ok(_) => {
                debug!(entry_id = %id, "cleared stale running balance");
                Ok(())
            }
            Err(StoreError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
