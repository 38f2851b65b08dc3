use serde_json::json;
use tracing::debug;

use tally_store::{Filter, OrderKey, RecordStore, Stored};
use tally_types::{Collection, ContainerStock, Product, RecordId};

use crate::adjust::{read_modify_write, Adjustment, Plan, Planned};
use crate::config::AdjusterConfig;
use crate::error::LedgerResult;

/// Incremental maintenance of physical inventory counters.
///
/// Every write is floored at zero. A delta that would take a counter below
/// zero is silently clamped; the lost amount is not tracked anywhere. This is
/// a known limitation of the counters, not of the counterparty balances, which
/// are never clamped.
pub struct StockAdjuster<'a, S: ?Sized> {
    store: &'a S,
    config: AdjusterConfig,
}

impl<'a, S: RecordStore + ?Sized> StockAdjuster<'a, S> {
    pub fn new(store: &'a S, config: AdjusterConfig) -> Self {
        Self { store, config }
    }

    pub async fn adjust_product_stock(
        &self,
        product_id: &RecordId,
        delta: i64,
    ) -> LedgerResult<Adjustment<i64>> {
        let result = read_modify_write(
            self.store,
            Collection::Products,
            product_id,
            &self.config,
            |product: &Product| {
                let before = product.stock;
                if delta == 0 {
                    return Ok(Plan::Skip(before));
                }
                let after = clamped(before, delta);
                Ok(Plan::Write(Planned {
                    patch: json!({ "stock": after }),
                    before,
                    after,
                }))
            },
        )
        .await?;

        if let Adjustment::Applied { before, after } = &result {
            debug!(%product_id, delta, before, after, "product stock adjusted");
        }
        Ok(result)
    }

    /// Adjust the occupied and empty counters of one container stock record.
    pub async fn adjust_container_stock(
        &self,
        container_id: &RecordId,
        occupied_delta: i64,
        empty_delta: i64,
    ) -> LedgerResult<Adjustment<(i64, i64)>> {
        let result = read_modify_write(
            self.store,
            Collection::Containers,
            container_id,
            &self.config,
            |stock: &ContainerStock| {
                let before = (stock.occupied, stock.empty);
                if occupied_delta == 0 && empty_delta == 0 {
                    return Ok(Plan::Skip(before));
                }
                let after = (
                    clamped(stock.occupied, occupied_delta),
                    clamped(stock.empty, empty_delta),
                );
                Ok(Plan::Write(Planned {
                    patch: json!({ "occupied": after.0, "empty": after.1 }),
                    before,
                    after,
                }))
            },
        )
        .await?;

        if let Adjustment::Applied { before, after } = &result {
            debug!(
                %container_id,
                occupied_delta,
                empty_delta,
                before = ?before,
                after = ?after,
                "container stock adjusted"
            );
        }
        Ok(result)
    }

    /// Look up the stock record for a container type by name.
    pub async fn find_container_stock(
        &self,
        container_type: &str,
    ) -> LedgerResult<Option<Stored<ContainerStock>>> {
        let filter = Filter::new().eq("name", container_type);
        let page = self
            .store
            .filter(Collection::Containers, &filter, &OrderKey::by_id(), 1, 0)
            .await?;
        match page.first() {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }
}

fn clamped(current: i64, delta: i64) -> i64 {
    current.saturating_add(delta).max(0)
}
