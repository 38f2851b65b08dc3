//! Typed convenience wrappers over [`RecordStore`].

use serde_json::Value;
use tally_types::{Counterparty, CounterpartyRef, RecordId};

use crate::document::{Record, Stored};
use crate::error::StoreResult;
use crate::pager::{fetch_all, FetchConfig};
use crate::query::{Filter, OrderKey};
use crate::traits::RecordStore;

pub async fn get_record<T: Record, S: RecordStore + ?Sized>(
    store: &S,
    id: &RecordId,
) -> StoreResult<Option<Stored<T>>> {
    match store.get(T::COLLECTION, id).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

pub async fn create_record<T: Record, S: RecordStore + ?Sized>(
    store: &S,
    record: T,
) -> StoreResult<Stored<T>> {
    let doc = store.create(T::COLLECTION, record.to_body()?).await?;
    Ok(Stored {
        id: doc.id,
        version: doc.version,
        record,
    })
}

/// Apply a field patch to a typed record, returning the decoded result.
pub async fn update_record<T: Record, S: RecordStore + ?Sized>(
    store: &S,
    id: &RecordId,
    patch: Value,
    expected_version: Option<u64>,
) -> StoreResult<Stored<T>> {
    store
        .update(T::COLLECTION, id, patch, expected_version)
        .await?
        .decode()
}

/// Page through a whole collection and decode every record.
pub async fn fetch_all_records<T: Record, S: RecordStore + ?Sized>(
    store: &S,
    filter: Option<&Filter>,
    order: &OrderKey,
    config: &FetchConfig,
) -> StoreResult<Vec<Stored<T>>> {
    fetch_all(store, T::COLLECTION, filter, order, config)
        .await?
        .iter()
        .map(|doc| doc.decode())
        .collect()
}

/// Fetch a supplier or customer by reference.
pub async fn get_counterparty<S: RecordStore + ?Sized>(
    store: &S,
    counterparty: &CounterpartyRef,
) -> StoreResult<Option<Stored<Counterparty>>> {
    match store.get(counterparty.collection(), &counterparty.id).await? {
        Some(doc) => Ok(Some(doc.decode_in(counterparty.collection())?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;
    use tally_types::{Collection, Product, Shipment};

    use super::*;
    use crate::memory::InMemoryRecordStore;

    #[tokio::test]
    async fn typed_create_get_update() {
        let store = InMemoryRecordStore::new();
        let created = create_record(
            &store,
            Product {
                name: "Tomato".into(),
                stock: 10,
            },
        )
        .await
        .unwrap();

        let fetched = get_record::<Product, _>(&store, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.record.stock, 10);

        let updated = update_record::<Product, _>(&store, &created.id, json!({"stock": 3}), Some(1))
            .await
            .unwrap();
        assert_eq!(updated.record.stock, 3);
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn fetch_all_records_decodes_every_page() {
        let store = InMemoryRecordStore::new();
        for day in 1..=5 {
            create_record(
                &store,
                Shipment {
                    date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
                    customer_id: "c1".into(),
                    confirmed: day % 2 == 1,
                    debt: Default::default(),
                    product_id: None,
                    net_stock: 0,
                    full_containers: vec![],
                },
            )
            .await
            .unwrap();
        }
        let confirmed = fetch_all_records::<Shipment, _>(
            &store,
            Some(&Filter::new().eq("confirmed", true)),
            &OrderKey::desc("date"),
            &FetchConfig::unthrottled(2),
        )
        .await
        .unwrap();
        let days: Vec<_> = confirmed
            .iter()
            .map(|s| s.record.date.format("%d").to_string())
            .collect();
        assert_eq!(days, ["05", "03", "01"]);
    }

    #[tokio::test]
    async fn counterparty_lookup_uses_kind_collection() {
        let store = InMemoryRecordStore::new();
        let doc = store
            .create(Collection::Customers, json!({"name": "Deli"}))
            .await
            .unwrap();

        let found = get_counterparty(&store, &CounterpartyRef::customer(doc.id.clone()))
            .await
            .unwrap();
        assert_eq!(found.unwrap().record.name, "Deli");

        let missing = get_counterparty(&store, &CounterpartyRef::supplier(doc.id))
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
