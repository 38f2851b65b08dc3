//! Reconciliation for Tally.
//!
//! The cached balances on counterparties and ledger entries are maintained
//! incrementally by `tally-ledger` and drift whenever a posting fails part
//! way through. This crate rebuilds them from complete history:
//!
//! - [`ReplayEngine`] loads every source record through the pager, stages the
//!   derived values in memory and writes the ones that differ
//! - [`ReplayEngine::audit`] reports drift without writing
//! - [`CorrectionOrchestrator`] runs named repair operations, records a
//!   completion marker per run, and skips a run when its inputs and the stored
//!   state are unchanged since the last one
//!
//! Replays write one record at a time with no rollback. Progress of a
//! checkpointed run is saved in the `job_checkpoints` collection so a failed
//! run resumes where it stopped.

pub mod audit;
pub mod config;
pub mod digest;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod replay;
pub mod writer;

pub use audit::{Drift, DriftReport};
pub use config::ReconcileConfig;
pub use digest::{Digest, DigestBuilder};
pub use error::{ReconcileError, ReconcileResult};
pub use history::{load_counterparties, load_ledger, ContainerSources, Counterparties};
pub use orchestrator::{
    find_duplicates, CorrectionKind, CorrectionOrchestrator, CorrectionOutcome, CorrectionRun,
    RunMode,
};
pub use replay::{Prepared, ReplayEngine, ReplaySummary};
pub use writer::{BatchWriter, CheckpointKey, JobCheckpoint, StagedWrite, WriteReport, WriteTarget};
