//! Derivation rules shared by the incremental path and full replay.
//!
//! Both paths must agree on what a source record means for a balance, so the
//! rules live here as pure functions. The posting service applies them one
//! event at a time; the replay engine folds them over the whole history.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_store::Stored;
use tally_types::{
    round_money, ContainerBalances, CounterpartyRef, GoodsReceipt, LedgerEntry, PackagingMovement,
    RecordId, Shipment,
};

/// Source record kinds that move container balances.
///
/// The declaration order is the tie-break rank for events sharing a date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PackagingMovement,
    GoodsReceipt,
    Shipment,
}

/// One dated change to a counterparty's container balances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerEvent {
    pub date: NaiveDate,
    pub kind: EventKind,
    pub source_id: RecordId,
    pub counterparty: CounterpartyRef,
    pub deltas: Vec<(String, i64)>,
}

impl ContainerEvent {
    /// Ingress lines lower the balance, egress lines raise it.
    pub fn from_movement(id: &RecordId, movement: &PackagingMovement) -> Self {
        Self {
            date: movement.date,
            kind: EventKind::PackagingMovement,
            source_id: id.clone(),
            counterparty: movement.counterparty.clone(),
            deltas: movement
                .lines
                .iter()
                .map(|line| (line.container_type.clone(), line.flow.balance_delta(line.quantity)))
                .collect(),
        }
    }

    /// Containers that arrived full lower the supplier's balance.
    pub fn from_receipt(id: &RecordId, receipt: &GoodsReceipt) -> Option<Self> {
        if receipt.full_containers.is_empty() {
            return None;
        }
        Some(Self {
            date: receipt.date,
            kind: EventKind::GoodsReceipt,
            source_id: id.clone(),
            counterparty: CounterpartyRef::supplier(receipt.supplier_id.clone()),
            deltas: receipt
                .full_containers
                .iter()
                .map(|line| (line.container_type.clone(), -line.quantity))
                .collect(),
        })
    }

    /// Containers that left full raise the customer's balance. Unconfirmed
    /// shipments produce no event.
    pub fn from_shipment(id: &RecordId, shipment: &Shipment) -> Option<Self> {
        if !shipment.confirmed || shipment.full_containers.is_empty() {
            return None;
        }
        Some(Self {
            date: shipment.date,
            kind: EventKind::Shipment,
            source_id: id.clone(),
            counterparty: CounterpartyRef::customer(shipment.customer_id.clone()),
            deltas: shipment
                .full_containers
                .iter()
                .map(|line| (line.container_type.clone(), line.quantity))
                .collect(),
        })
    }

    pub fn sort_key(&self) -> (NaiveDate, EventKind, &RecordId) {
        (self.date, self.kind, &self.source_id)
    }
}

/// Sort events by `(date, kind, id)` and fold them into per-counterparty
/// balance maps. Zero entries are dropped.
pub fn fold_container_events(
    events: &mut [ContainerEvent],
) -> BTreeMap<CounterpartyRef, ContainerBalances> {
    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut balances: BTreeMap<CounterpartyRef, ContainerBalances> = BTreeMap::new();
    for event in events.iter() {
        let map = balances.entry(event.counterparty.clone()).or_default();
        for (container_type, delta) in &event.deltas {
            map.apply(container_type, *delta);
        }
    }
    balances
}

/// Result of threading one counterparty's ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoneyThread {
    pub balance: Decimal,
    /// Running balance after each non-voided entry, in threading order.
    pub running: Vec<(RecordId, Decimal)>,
}

/// Thread running balances through a counterparty's entries in `(date, id)`
/// order. Voided entries are skipped and get no running balance.
///
/// Sums are exact; only the balance and each running value are rounded, so
/// sub-cent amounts never compound rounding error.
pub fn thread_entries<'a, I>(entries: I) -> MoneyThread
where
    I: IntoIterator<Item = &'a Stored<LedgerEntry>>,
{
    let mut ordered: Vec<&Stored<LedgerEntry>> =
        entries.into_iter().filter(|e| !e.record.voided).collect();
    ordered.sort_by(|a, b| (a.record.date, &a.id).cmp(&(b.record.date, &b.id)));

    let mut exact = Decimal::ZERO;
    let mut running = Vec::with_capacity(ordered.len());
    for entry in ordered {
        exact += entry.record.signed_amount();
        running.push((entry.id.clone(), round_money(exact)));
    }
    MoneyThread {
        balance: round_money(exact),
        running,
    }
}

/// A change to a physical inventory counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StockEffect {
    Product {
        id: RecordId,
        delta: i64,
    },
    Container {
        container_type: String,
        occupied: i64,
        empty: i64,
    },
}

/// Received goods add product stock and occupied containers.
pub fn stock_effects_of_receipt(receipt: &GoodsReceipt) -> Vec<StockEffect> {
    let mut effects = product_effect(receipt.product_id.as_ref(), receipt.net_stock);
    effects.extend(receipt.full_containers.iter().map(|line| StockEffect::Container {
        container_type: line.container_type.clone(),
        occupied: line.quantity,
        empty: 0,
    }));
    effects
}

/// Confirmed shipments remove product stock and occupied containers.
pub fn stock_effects_of_shipment(shipment: &Shipment) -> Vec<StockEffect> {
    if !shipment.confirmed {
        return Vec::new();
    }
    let mut effects = product_effect(shipment.product_id.as_ref(), -shipment.net_stock);
    effects.extend(shipment.full_containers.iter().map(|line| StockEffect::Container {
        container_type: line.container_type.clone(),
        occupied: -line.quantity,
        empty: 0,
    }));
    effects
}

/// Returned empties go back on the shelf; delivered empties leave it.
pub fn stock_effects_of_movement(movement: &PackagingMovement) -> Vec<StockEffect> {
    movement
        .lines
        .iter()
        .map(|line| StockEffect::Container {
            container_type: line.container_type.clone(),
            occupied: 0,
            empty: -line.flow.balance_delta(line.quantity),
        })
        .collect()
}

fn product_effect(product_id: Option<&RecordId>, delta: i64) -> Vec<StockEffect> {
    match product_id {
        Some(id) if delta != 0 => vec![StockEffect::Product {
            id: id.clone(),
            delta,
        }],
        _ => Vec::new(),
    }
}
