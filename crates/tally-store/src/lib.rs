//! Record-store access for Tally.
//!
//! Tally does not own its persistence layer. It talks to a generic record
//! store that exposes list/filter/get/create/update/delete over named
//! collections of JSON documents, with offset pagination. This crate defines
//! that contract and the pieces every balance routine builds on.
//!
//! # Components
//!
//! - [`RecordStore`]: the async contract consumed by the engine
//! - [`Document`] / [`Record`] / [`Stored`]: untyped documents and typed views
//! - [`Pager`] / [`fetch_all`]: full-collection reads in bounded, throttled pages
//! - [`InMemoryRecordStore`]: `RwLock`-backed store for tests, the CLI, and embedding
//!
//! # Design Rules
//!
//! 1. Bounded requests may be silently truncated by the upstream; anything that
//!    must see a whole collection goes through the [`Pager`].
//! 2. Updates are shallow merges of top-level fields and may carry the version
//!    that was read; a mismatch is reported as [`StoreError::Conflict`].
//! 3. There are no multi-record transactions.

pub mod document;
pub mod error;
pub mod memory;
pub mod pager;
pub mod query;
pub mod traits;
pub mod typed;

pub use document::{encode, Document, Record, Stored};
pub use error::{StoreError, StoreResult};
pub use memory::{FaultPlan, InMemoryRecordStore, StoreSnapshot};
pub use pager::{fetch_all, FetchConfig, Pager};
pub use query::{Filter, OrderKey};
pub use traits::RecordStore;
pub use typed::{create_record, fetch_all_records, get_counterparty, get_record, update_record};
