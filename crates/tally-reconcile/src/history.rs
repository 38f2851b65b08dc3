//! Loading complete source history through the pager.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use tally_ledger::ContainerEvent;
use tally_store::{fetch_all, fetch_all_records, FetchConfig, Filter, OrderKey, RecordStore, Stored};
use tally_types::{
    Counterparty, CounterpartyKind, CounterpartyRef, Direction, GoodsReceipt, LedgerEntry,
    PackagingMovement, Shipment, SourceRef,
};

use crate::digest::DigestBuilder;
use crate::error::ReconcileResult;

/// Every supplier and customer, keyed in write order.
pub type Counterparties = BTreeMap<CounterpartyRef, Stored<Counterparty>>;

pub async fn load_counterparties<S: RecordStore + ?Sized>(
    store: &S,
    fetch: &FetchConfig,
) -> ReconcileResult<Counterparties> {
    let mut counterparties = Counterparties::new();
    for kind in [CounterpartyKind::Supplier, CounterpartyKind::Customer] {
        let collection = kind.collection();
        let docs = fetch_all(store, collection, None, &OrderKey::by_id(), fetch).await?;
        for doc in docs {
            let stored = doc.decode_in::<Counterparty>(collection)?;
            counterparties.insert(
                CounterpartyRef {
                    kind,
                    id: stored.id.clone(),
                },
                stored,
            );
        }
    }
    debug!(count = counterparties.len(), "counterparties loaded");
    Ok(counterparties)
}

/// All ledger entries, voided ones included.
pub async fn load_ledger<S: RecordStore + ?Sized>(
    store: &S,
    fetch: &FetchConfig,
) -> ReconcileResult<Vec<Stored<LedgerEntry>>> {
    let entries = fetch_all_records(store, None, &OrderKey::by_id(), fetch).await?;
    debug!(count = entries.len(), "ledger entries loaded");
    Ok(entries)
}

/// One counterparty's ledger entries, voided ones included.
pub async fn load_counterparty_ledger<S: RecordStore + ?Sized>(
    store: &S,
    fetch: &FetchConfig,
    counterparty: &CounterpartyRef,
) -> ReconcileResult<Vec<Stored<LedgerEntry>>> {
    let filter = Filter::new()
        .eq("counterparty.kind", counterparty.kind.as_str())
        .eq("counterparty.id", counterparty.id.as_str());
    Ok(fetch_all_records(store, Some(&filter), &OrderKey::by_id(), fetch).await?)
}

/// The three record kinds container balances derive from.
#[derive(Clone, Debug, Default)]
pub struct ContainerSources {
    pub movements: Vec<Stored<PackagingMovement>>,
    pub receipts: Vec<Stored<GoodsReceipt>>,
    /// Confirmed shipments only.
    pub shipments: Vec<Stored<Shipment>>,
}

impl ContainerSources {
    pub async fn load<S: RecordStore + ?Sized>(
        store: &S,
        fetch: &FetchConfig,
    ) -> ReconcileResult<Self> {
        let order = OrderKey::by_id();
        let confirmed = Filter::new().eq("confirmed", true);
        let sources = Self {
            movements: fetch_all_records(store, None, &order, fetch).await?,
            receipts: fetch_all_records(store, None, &order, fetch).await?,
            shipments: fetch_all_records(store, Some(&confirmed), &order, fetch).await?,
        };
        debug!(
            movements = sources.movements.len(),
            receipts = sources.receipts.len(),
            shipments = sources.shipments.len(),
            "container sources loaded"
        );
        Ok(sources)
    }

    pub fn records(&self) -> usize {
        self.movements.len() + self.receipts.len() + self.shipments.len()
    }

    /// Container events in no particular order.
    pub fn events(&self) -> Vec<ContainerEvent> {
        let movements = self
            .movements
            .iter()
            .map(|m| ContainerEvent::from_movement(&m.id, &m.record));
        let receipts = self
            .receipts
            .iter()
            .filter_map(|r| ContainerEvent::from_receipt(&r.id, &r.record));
        let shipments = self
            .shipments
            .iter()
            .filter_map(|s| ContainerEvent::from_shipment(&s.id, &s.record));
        movements.chain(receipts).chain(shipments).collect()
    }

    pub fn digest_into(&self, builder: &mut DigestBuilder) -> ReconcileResult<()> {
        for movement in &self.movements {
            builder.item(&("movement", &movement.id, &movement.record))?;
        }
        for receipt in &self.receipts {
            builder.item(&("receipt", &receipt.id, &receipt.record))?;
        }
        for shipment in &self.shipments {
            builder.item(&("shipment", &shipment.id, &shipment.record))?;
        }
        Ok(())
    }
}

/// The fields of an entry that money derivation reads. Cached running
/// balances and concept text are excluded.
#[derive(Serialize)]
struct EntryInputs<'a> {
    id: &'a str,
    date: NaiveDate,
    direction: Direction,
    counterparty: &'a CounterpartyRef,
    amount: String,
    voided: bool,
    source: Option<&'a SourceRef>,
}

pub fn digest_ledger(
    entries: &[Stored<LedgerEntry>],
    builder: &mut DigestBuilder,
) -> ReconcileResult<()> {
    for entry in entries {
        builder.item(&EntryInputs {
            id: entry.id.as_str(),
            date: entry.record.date,
            direction: entry.record.direction,
            counterparty: &entry.record.counterparty,
            amount: entry.record.amount.normalize().to_string(),
            voided: entry.record.voided,
            source: entry.record.source.as_ref(),
        })?;
    }
    Ok(())
}

pub fn digest_counterparty_set(
    counterparties: &Counterparties,
    builder: &mut DigestBuilder,
) -> ReconcileResult<()> {
    for counterparty in counterparties.keys() {
        builder.item(counterparty)?;
    }
    Ok(())
}

/// Group entries by counterparty, warning about entries whose counterparty
/// no longer exists. Those are still threaded but no balance is written.
pub fn group_by_counterparty<'a>(
    entries: &'a [Stored<LedgerEntry>],
    counterparties: &Counterparties,
) -> BTreeMap<CounterpartyRef, Vec<&'a Stored<LedgerEntry>>> {
    let mut groups: BTreeMap<CounterpartyRef, Vec<&Stored<LedgerEntry>>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(entry.record.counterparty.clone())
            .or_default()
            .push(entry);
    }
    for (counterparty, group) in &groups {
        if !counterparties.contains_key(counterparty) {
            warn!(%counterparty, entries = group.len(), "ledger entries reference a missing counterparty");
        }
    }
    groups
}
