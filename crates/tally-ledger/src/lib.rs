//! Ledger and incremental balance maintenance for Tally.
//!
//! This crate is the fast path. It provides:
//! - `LedgerRecorder` for idempotent ledger entry creation and voiding
//! - `BalanceAdjuster` / `StockAdjuster` read-modify-write services
//! - Derivation rules shared with full replay (container deltas, money threading)
//! - `PostingService`, which records a source event and applies every adjuster
//!
//! Nothing here is atomic across records. A failure between writing a source
//! document and adjusting a balance leaves drift for the replay engine in
//! `tally-reconcile` to repair.

pub mod adjust;
pub mod config;
pub mod derivation;
pub mod error;
pub mod posting;
pub mod recorder;
pub mod stock;

pub use adjust::{Adjustment, BalanceAdjuster};
pub use config::AdjusterConfig;
pub use derivation::{
    fold_container_events, stock_effects_of_movement, stock_effects_of_receipt,
    stock_effects_of_shipment, thread_entries, ContainerEvent, EventKind, MoneyThread,
    StockEffect,
};
pub use error::{LedgerError, LedgerResult};
pub use posting::{PostingReceipt, PostingService};
pub use recorder::{LedgerRecorder, NewEntry, Recorded, VoidOutcome};
pub use stock::StockAdjuster;
