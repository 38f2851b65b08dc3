use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tally_types::{
    Collection, ContainerStock, GoodsReceipt, LedgerEntry, PackagingMovement, Product, RecordId,
    Shipment,
};

use crate::error::{StoreError, StoreResult};

/// A record as held by the store: identity, optimistic-concurrency version,
/// and an opaque JSON body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: RecordId,
    pub version: u64,
    pub body: Value,
}

impl Document {
    /// Look up a possibly dotted field path (`counterparty.id`) in the body.
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.body, |value, segment| value.get(segment))
    }

    /// Decode the body into a typed record.
    pub fn decode<T: Record>(&self) -> StoreResult<Stored<T>> {
        self.decode_in(T::COLLECTION)
    }

    /// Decode the body of a document read from `collection`.
    pub fn decode_in<T: DeserializeOwned>(&self, collection: Collection) -> StoreResult<Stored<T>> {
        let record = serde_json::from_value(self.body.clone()).map_err(|e| {
            StoreError::Serialization {
                collection,
                reason: format!("{}: {e}", self.id),
            }
        })?;
        Ok(Stored {
            id: self.id.clone(),
            version: self.version,
            record,
        })
    }
}

/// A typed record living in a fixed collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    /// Encode into a document body.
    fn to_body(&self) -> StoreResult<Value> {
        encode(Self::COLLECTION, self)
    }
}

/// Encode any serializable value as a document body for `collection`.
pub fn encode<T: Serialize + ?Sized>(collection: Collection, value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization {
        collection,
        reason: e.to_string(),
    })
}

/// A decoded record together with the identity and version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Stored<T> {
    pub id: RecordId,
    pub version: u64,
    pub record: T,
}

impl Record for LedgerEntry {
    const COLLECTION: Collection = Collection::LedgerEntries;
}

impl Record for PackagingMovement {
    const COLLECTION: Collection = Collection::PackagingMovements;
}

impl Record for GoodsReceipt {
    const COLLECTION: Collection = Collection::GoodsReceipts;
}

impl Record for Shipment {
    const COLLECTION: Collection = Collection::Shipments;
}

impl Record for Product {
    const COLLECTION: Collection = Collection::Products;
}

impl Record for ContainerStock {
    const COLLECTION: Collection = Collection::Containers;
}
