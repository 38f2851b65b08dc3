use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info};

use tally_store::{create_record, get_record, RecordStore};
use tally_types::{
    round_money, Collection, CounterpartyRef, Direction, GoodsReceipt, PackagingMovement, RecordId,
    Shipment, SourceRef,
};

use crate::adjust::{Adjustment, BalanceAdjuster};
use crate::config::AdjusterConfig;
use crate::derivation::{
    stock_effects_of_movement, stock_effects_of_receipt, stock_effects_of_shipment,
    ContainerEvent, StockEffect,
};
use crate::error::LedgerResult;
use crate::recorder::{LedgerRecorder, NewEntry, Recorded, VoidOutcome};
use crate::stock::StockAdjuster;

/// What one posting wrote.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostingReceipt {
    /// The source document created or touched by the posting.
    pub document_id: Option<RecordId>,
    pub entry: Option<Recorded>,
    pub money: Option<Adjustment<Decimal>>,
    /// Container balance adjustments that wrote a record.
    pub containers_adjusted: usize,
    /// Inventory counter adjustments that wrote a record.
    pub stock_adjusted: usize,
    /// Cached running balances of this counterparty are stale and should be
    /// rethreaded.
    pub needs_rethread: bool,
}

/// The incremental write path for source events.
///
/// Each step is a separate store write. A failure part way through leaves the
/// steps before it applied; full replay repairs the balances afterwards.
pub struct PostingService<'a, S: ?Sized> {
    store: &'a S,
    config: AdjusterConfig,
}

impl<'a, S: RecordStore + ?Sized> PostingService<'a, S> {
    pub fn new(store: &'a S, config: AdjusterConfig) -> Self {
        Self { store, config }
    }

    fn recorder(&self) -> LedgerRecorder<'a, S> {
        LedgerRecorder::new(self.store)
    }

    fn balances(&self) -> BalanceAdjuster<'a, S> {
        BalanceAdjuster::new(self.store, self.config.clone())
    }

    fn stock(&self) -> StockAdjuster<'a, S> {
        StockAdjuster::new(self.store, self.config.clone())
    }

    /// Store a goods receipt, post its debt to the supplier and apply its
    /// container and stock effects.
    pub async fn post_goods_receipt(&self, receipt: GoodsReceipt) -> LedgerResult<PostingReceipt> {
        let stored = create_record(self.store, receipt).await?;
        let supplier = CounterpartyRef::supplier(stored.record.supplier_id.clone());

        let mut posted = PostingReceipt {
            document_id: Some(stored.id.clone()),
            ..PostingReceipt::default()
        };
        self.post_debt(
            &mut posted,
            NewEntry::new(stored.record.date, Direction::Credit, supplier, stored.record.debt)
                .concept(format!("goods receipt {}", stored.id))
                .source(SourceRef::goods_receipt(stored.id.clone())),
        )
        .await?;
        if let Some(event) = ContainerEvent::from_receipt(&stored.id, &stored.record) {
            self.apply_container_event(&mut posted, &event).await?;
        }
        self.apply_stock(&mut posted, stock_effects_of_receipt(&stored.record))
            .await?;

        info!(receipt_id = %stored.id, "goods receipt posted");
        Ok(posted)
    }

    /// Store a shipment. Balances only move once it is confirmed, either here
    /// or later through [`PostingService::confirm_shipment`].
    pub async fn post_shipment(&self, shipment: Shipment) -> LedgerResult<PostingReceipt> {
        let stored = create_record(self.store, shipment).await?;
        let mut posted = PostingReceipt {
            document_id: Some(stored.id.clone()),
            ..PostingReceipt::default()
        };
        if stored.record.confirmed {
            self.apply_confirmed_shipment(&mut posted, &stored.id, &stored.record)
                .await?;
        }
        info!(shipment_id = %stored.id, confirmed = stored.record.confirmed, "shipment posted");
        Ok(posted)
    }

    /// Confirm a pending shipment and apply its effects. Returns `None` when
    /// the shipment does not exist; confirming twice applies nothing.
    pub async fn confirm_shipment(&self, id: &RecordId) -> LedgerResult<Option<PostingReceipt>> {
        let Some(current) = get_record::<Shipment, _>(self.store, id).await? else {
            return Ok(None);
        };
        let mut posted = PostingReceipt {
            document_id: Some(id.clone()),
            ..PostingReceipt::default()
        };
        if current.record.confirmed {
            debug!(shipment_id = %id, "shipment already confirmed");
            return Ok(Some(posted));
        }

        self.store
            .update(
                Collection::Shipments,
                id,
                json!({ "confirmed": true }),
                Some(current.version),
            )
            .await?;
        let mut shipment = current.record;
        shipment.confirmed = true;
        self.apply_confirmed_shipment(&mut posted, id, &shipment)
            .await?;

        info!(shipment_id = %id, "shipment confirmed");
        Ok(Some(posted))
    }

    /// Store a packaging movement and apply it to the counterparty's
    /// container balances and the empty-container stock.
    pub async fn post_packaging_movement(
        &self,
        movement: PackagingMovement,
    ) -> LedgerResult<PostingReceipt> {
        let stored = create_record(self.store, movement).await?;
        let mut posted = PostingReceipt {
            document_id: Some(stored.id.clone()),
            ..PostingReceipt::default()
        };
        let event = ContainerEvent::from_movement(&stored.id, &stored.record);
        self.apply_container_event(&mut posted, &event).await?;
        self.apply_stock(&mut posted, stock_effects_of_movement(&stored.record))
            .await?;

        info!(movement_id = %stored.id, lines = stored.record.lines.len(), "packaging movement posted");
        Ok(posted)
    }

    /// Post a payment or collection directly against a counterparty.
    pub async fn post_treasury(
        &self,
        counterparty: CounterpartyRef,
        direction: Direction,
        amount: Decimal,
        date: NaiveDate,
        concept: impl Into<String>,
    ) -> LedgerResult<PostingReceipt> {
        let mut posted = PostingReceipt::default();
        self.post_debt(
            &mut posted,
            NewEntry::new(date, direction, counterparty, amount).concept(concept),
        )
        .await?;
        Ok(posted)
    }

    /// Void an entry and take its amount back out of the money balance.
    pub async fn void_entry(&self, id: &RecordId) -> LedgerResult<PostingReceipt> {
        let mut posted = PostingReceipt::default();
        if let VoidOutcome::Voided {
            counterparty,
            reversal,
        } = self.recorder().void(id).await?
        {
            posted.money = Some(self.balances().adjust_money(&counterparty, reversal).await?);
            posted.needs_rethread = true;
        }
        Ok(posted)
    }

    async fn apply_confirmed_shipment(
        &self,
        posted: &mut PostingReceipt,
        id: &RecordId,
        shipment: &Shipment,
    ) -> LedgerResult<()> {
        let customer = CounterpartyRef::customer(shipment.customer_id.clone());
        self.post_debt(
            posted,
            NewEntry::new(shipment.date, Direction::Credit, customer, shipment.debt)
                .concept(format!("shipment {id}"))
                .source(SourceRef::shipment(id.clone())),
        )
        .await?;
        if let Some(event) = ContainerEvent::from_shipment(id, shipment) {
            self.apply_container_event(posted, &event).await?;
        }
        self.apply_stock(posted, stock_effects_of_shipment(shipment))
            .await
    }

    /// Record the entry and move the money balance by the amount the ledger
    /// stores. Amounts that round to zero post nothing; a duplicate source
    /// leaves the balance alone.
    async fn post_debt(&self, posted: &mut PostingReceipt, entry: NewEntry) -> LedgerResult<()> {
        let amount = round_money(entry.amount);
        if amount.is_zero() {
            return Ok(());
        }
        let counterparty = entry.counterparty.clone();
        let delta = entry.direction.signed(amount);

        let recorded = self.recorder().record(entry).await?;
        if let Recorded::Created { needs_rethread, .. } = &recorded {
            posted.needs_rethread |= *needs_rethread;
            posted.money = Some(self.balances().adjust_money(&counterparty, delta).await?);
        }
        posted.entry = Some(recorded);
        Ok(())
    }

    async fn apply_container_event(
        &self,
        posted: &mut PostingReceipt,
        event: &ContainerEvent,
    ) -> LedgerResult<()> {
        let balances = self.balances();
        for (container_type, delta) in &event.deltas {
            if balances
                .adjust_containers(&event.counterparty, container_type, *delta)
                .await?
                .is_applied()
            {
                posted.containers_adjusted += 1;
            }
        }
        Ok(())
    }

    async fn apply_stock(
        &self,
        posted: &mut PostingReceipt,
        effects: Vec<StockEffect>,
    ) -> LedgerResult<()> {
        let stock = self.stock();
        for effect in effects {
            let applied = match effect {
                StockEffect::Product { id, delta } => {
                    stock.adjust_product_stock(&id, delta).await?.is_applied()
                }
                StockEffect::Container {
                    container_type,
                    occupied,
                    empty,
                } => match stock.find_container_stock(&container_type).await? {
                    Some(found) => stock
                        .adjust_container_stock(&found.id, occupied, empty)
                        .await?
                        .is_applied(),
                    None => {
                        debug!(%container_type, "no stock record for container type");
                        false
                    }
                },
            };
            if applied {
                posted.stock_adjusted += 1;
            }
        }
        Ok(())
    }
}
