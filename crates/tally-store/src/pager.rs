use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_types::Collection;
use tracing::debug;

use crate::document::Document;
use crate::error::StoreResult;
use crate::query::{Filter, OrderKey};
use crate::traits::RecordStore;

/// Paging discipline for full-collection reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Records requested per page. Must not exceed the upstream's own cap,
    /// otherwise a capped page looks like the last one.
    pub page_size: usize,
    /// Pause inserted between consecutive page requests.
    pub page_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_delay_ms: 200,
        }
    }
}

impl FetchConfig {
    /// Paging without any inter-page pause, for tests and local stores.
    pub fn unthrottled(page_size: usize) -> Self {
        Self {
            page_size,
            page_delay_ms: 0,
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

/// Resumable full-collection reader.
///
/// Requests pages at increasing offsets until a page comes back shorter than
/// the page size. Records and offset survive a failed request, so calling
/// [`Pager::drain`] again continues at the page that failed instead of
/// rescanning the collection.
#[derive(Debug)]
pub struct Pager {
    collection: Collection,
    filter: Option<Filter>,
    order: OrderKey,
    config: FetchConfig,
    offset: usize,
    pages: u64,
    records: Vec<Document>,
    done: bool,
}

impl Pager {
    pub fn new(collection: Collection, order: OrderKey, config: FetchConfig) -> Self {
        Self {
            collection,
            filter: None,
            order,
            config,
            offset: 0,
            pages: 0,
            records: Vec::new(),
            done: false,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Offset of the next page to request.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch remaining pages. On error the pager keeps everything read so far.
    pub async fn drain<S: RecordStore + ?Sized>(&mut self, store: &S) -> StoreResult<()> {
        let page_size = self.config.page_size.max(1);
        while !self.done {
            if self.pages > 0 && self.config.page_delay_ms > 0 {
                tokio::time::sleep(self.config.page_delay()).await;
            }

            let page = match &self.filter {
                Some(filter) => {
                    store
                        .filter(self.collection, filter, &self.order, page_size, self.offset)
                        .await?
                }
                None => {
                    store
                        .list(self.collection, &self.order, page_size, self.offset)
                        .await?
                }
            };

            let received = page.len();
            self.offset += received;
            self.pages += 1;
            self.records.extend(page);
            debug!(
                collection = %self.collection,
                page = self.pages,
                received,
                offset = self.offset,
                "page fetched"
            );

            if received < page_size {
                self.done = true;
            }
        }
        Ok(())
    }

    pub fn records(&self) -> &[Document] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Document> {
        self.records
    }
}

/// Read an entire collection (optionally filtered) in throttled pages.
pub async fn fetch_all<S: RecordStore + ?Sized>(
    store: &S,
    collection: Collection,
    filter: Option<&Filter>,
    order: &OrderKey,
    config: &FetchConfig,
) -> StoreResult<Vec<Document>> {
    let mut pager = Pager::new(collection, order.clone(), config.clone());
    if let Some(filter) = filter {
        pager = pager.with_filter(filter.clone());
    }
    pager.drain(store).await?;
    Ok(pager.into_records())
}
