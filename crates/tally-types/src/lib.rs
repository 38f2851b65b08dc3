//! Foundation types for Tally.
//!
//! Tally keeps two derived balances per business counterparty: a monetary
//! debt balance and a per-container-type returnable-packaging balance. This
//! crate holds the record shapes every other Tally crate agrees on.
//!
//! # Key Types
//!
//! - [`Collection`]: named record collections in the backing store
//! - [`RecordId`] / [`CounterpartyRef`]: record identities
//! - [`Direction`] and [`round_money`]: monetary sign and precision rules
//! - [`ContainerBalances`]: sparse, lenient per-type container map
//! - [`LedgerEntry`], [`GoodsReceipt`], [`Shipment`], [`PackagingMovement`]:
//!   the event history balances are derived from

pub mod collection;
pub mod containers;
pub mod error;
pub mod identity;
pub mod money;
pub mod records;

pub use collection::Collection;
pub use containers::ContainerBalances;
pub use error::TypeError;
pub use identity::{CounterpartyKind, CounterpartyRef, RecordId};
pub use money::{round_money, Direction};
pub use records::{
    ContainerLine, ContainerStock, Counterparty, Flow, GoodsReceipt, LedgerEntry,
    PackagingLine, PackagingMovement, Product, Shipment, SourceRef,
};
