use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::containers::ContainerBalances;
use crate::identity::{CounterpartyRef, RecordId};
use crate::money::Direction;

/// A supplier or customer as seen by the balance engine.
///
/// Master data (names, addresses, terms) is owned elsewhere; only the two
/// derived balances are written here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Counterparty {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub current_money_balance: Decimal,
    #[serde(default)]
    pub container_balances: ContainerBalances,
}

impl Counterparty {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// The document a ledger entry was posted for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub doc_type: String,
    pub id: RecordId,
}

impl SourceRef {
    pub const GOODS_RECEIPT: &'static str = "goods_receipt";
    pub const SHIPMENT: &'static str = "shipment";
    pub const TREASURY: &'static str = "treasury";

    pub fn new(doc_type: impl Into<String>, id: impl Into<RecordId>) -> Self {
        Self {
            doc_type: doc_type.into(),
            id: id.into(),
        }
    }

    pub fn goods_receipt(id: impl Into<RecordId>) -> Self {
        Self::new(Self::GOODS_RECEIPT, id)
    }

    pub fn shipment(id: impl Into<RecordId>) -> Self {
        Self::new(Self::SHIPMENT, id)
    }
}

/// One posting against a counterparty's money balance.
///
/// Immutable after creation except for `running_balance` (rewritten by
/// rethreading passes) and `voided`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub direction: Direction,
    pub counterparty: CounterpartyRef,
    pub amount: Decimal,
    #[serde(default)]
    pub concept: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_balance: Option<Decimal>,
    #[serde(default)]
    pub voided: bool,
}

impl LedgerEntry {
    /// Signed contribution to the counterparty balance; zero once voided.
    pub fn signed_amount(&self) -> Decimal {
        if self.voided {
            Decimal::ZERO
        } else {
            self.direction.signed(self.amount)
        }
    }
}

/// Whether empties moved towards the business or away from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Empties returned by the counterparty.
    Ingress,
    /// Empties delivered to the counterparty.
    Egress,
}

impl Flow {
    /// Effect of `quantity` units on the counterparty's container balance.
    pub fn balance_delta(&self, quantity: i64) -> i64 {
        match self {
            Self::Ingress => -quantity,
            Self::Egress => quantity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingLine {
    pub container_type: String,
    pub quantity: i64,
    pub flow: Flow,
}

/// Explicit movement of empty containers with one counterparty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingMovement {
    pub date: NaiveDate,
    pub counterparty: CounterpartyRef,
    #[serde(default)]
    pub lines: Vec<PackagingLine>,
    #[serde(default)]
    pub notes: String,
}

/// Containers that travelled full alongside goods.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLine {
    pub container_type: String,
    pub quantity: i64,
}

/// Goods received from a supplier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoodsReceipt {
    pub date: NaiveDate,
    pub supplier_id: RecordId,
    /// Amount owed to the supplier for this receipt; zero posts no entry.
    #[serde(default)]
    pub debt: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<RecordId>,
    /// Units added to the product's stock.
    #[serde(default)]
    pub net_stock: i64,
    #[serde(default)]
    pub full_containers: Vec<ContainerLine>,
}

/// Goods shipped to a customer. Only confirmed shipments affect balances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub date: NaiveDate,
    pub customer_id: RecordId,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub debt: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<RecordId>,
    /// Units removed from the product's stock.
    #[serde(default)]
    pub net_stock: i64,
    #[serde(default)]
    pub full_containers: Vec<ContainerLine>,
}

/// Inventory counter for a product.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stock: i64,
}

/// Inventory counters for one container type held by the business.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStock {
    /// The container-type name used in balance maps.
    pub name: String,
    #[serde(default)]
    pub occupied: i64,
    #[serde(default)]
    pub empty: i64,
}
