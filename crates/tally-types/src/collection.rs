use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A named collection of records in the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Suppliers,
    Customers,
    LedgerEntries,
    PackagingMovements,
    GoodsReceipts,
    Shipments,
    Products,
    Containers,
    CorrectionRuns,
    JobCheckpoints,
}

impl Collection {
    pub const ALL: [Collection; 10] = [
        Collection::Suppliers,
        Collection::Customers,
        Collection::LedgerEntries,
        Collection::PackagingMovements,
        Collection::GoodsReceipts,
        Collection::Shipments,
        Collection::Products,
        Collection::Containers,
        Collection::CorrectionRuns,
        Collection::JobCheckpoints,
    ];

    /// Stable storage name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Suppliers => "suppliers",
            Self::Customers => "customers",
            Self::LedgerEntries => "ledger_entries",
            Self::PackagingMovements => "packaging_movements",
            Self::GoodsReceipts => "goods_receipts",
            Self::Shipments => "shipments",
            Self::Products => "products",
            Self::Containers => "containers",
            Self::CorrectionRuns => "correction_runs",
            Self::JobCheckpoints => "job_checkpoints",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| TypeError::UnknownCollection(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for collection in Collection::ALL {
            assert_eq!(collection.name().parse::<Collection>().unwrap(), collection);
        }
    }

    #[test]
    fn serde_name_matches_storage_name() {
        let json = serde_json::to_string(&Collection::PackagingMovements).unwrap();
        assert_eq!(json, "\"packaging_movements\"");
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "invoices".parse::<Collection>().unwrap_err();
        assert_eq!(err, TypeError::UnknownCollection("invoices".into()));
    }
}
