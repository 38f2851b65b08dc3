use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::TypeError;

/// Opaque identifier assigned to a record by the backing store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which side of the business a counterparty sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterpartyKind {
    Supplier,
    Customer,
}

impl CounterpartyKind {
    /// The collection holding counterparties of this kind.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Supplier => Collection::Suppliers,
            Self::Customer => Collection::Customers,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier",
            Self::Customer => "customer",
        }
    }
}

/// Reference to a supplier or customer record.
///
/// Ordering is by kind, then id; replays write counterparties in this order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterpartyRef {
    pub kind: CounterpartyKind,
    pub id: RecordId,
}

impl CounterpartyRef {
    pub fn supplier(id: impl Into<RecordId>) -> Self {
        Self {
            kind: CounterpartyKind::Supplier,
            id: id.into(),
        }
    }

    pub fn customer(id: impl Into<RecordId>) -> Self {
        Self {
            kind: CounterpartyKind::Customer,
            id: id.into(),
        }
    }

    pub fn collection(&self) -> Collection {
        self.kind.collection()
    }
}

impl fmt::Display for CounterpartyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for CounterpartyRef {
    type Err = TypeError;

    /// Parse `supplier:<id>` or `customer:<id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| TypeError::InvalidCounterparty(s.to_string()))?;
        if id.is_empty() {
            return Err(TypeError::InvalidCounterparty(s.to_string()));
        }
        match kind {
            "supplier" => Ok(Self::supplier(id)),
            "customer" => Ok(Self::customer(id)),
            _ => Err(TypeError::InvalidCounterparty(s.to_string())),
        }
    }
}
