use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tally",
    about = "Tally: counterparty balance reconciliation",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// JSON snapshot of the record store to operate on
    #[arg(long, global = true, default_value = "tally-store.json")]
    pub store: PathBuf,

    /// TOML file with reconcile settings; defaults are used when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a correction from the catalog
    Run(RunArgs),
    /// Compare cached balances with a full replay without writing
    Audit(AuditArgs),
    /// List the available corrections
    Catalog(CatalogArgs),
    /// Show recorded correction runs
    History(HistoryArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Operation name, e.g. `resync-money-balances` or `dedupe-ledger:shipment`
    pub operation: String,
    /// Run even if nothing changed since the last completed run
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct AuditArgs {
    /// Exit with an error when any drift is found
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args)]
pub struct CatalogArgs {}

#[derive(Args)]
pub struct HistoryArgs {
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
    /// Only runs of this operation
    #[arg(long)]
    pub operation: Option<String>,
}
