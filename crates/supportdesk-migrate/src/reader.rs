//! Paginated extraction for one entity type.

use tracing::debug;

use crate::connectors::{DocumentSource, PageRequest, SourcePage};
use crate::error::{Error, Result};
use crate::registry::EntityTypeSpec;
use crate::retry::{with_retry, RetryPolicy};

/// Cursor over one entity type's source collection.
///
/// Pages are requested at strictly increasing offsets, ordered by the
/// entity's creation-timestamp field. The cursor advances by the number of
/// items actually received, rejected ones included, so a short page never
/// skips records.
pub struct SourceReader<'a> {
    source: &'a dyn DocumentSource,
    spec: &'a EntityTypeSpec,
    retry: &'a RetryPolicy,
    page_size: usize,
    offset: u64,
    total_count: u64,
    exhausted: bool,
}

impl<'a> SourceReader<'a> {
    /// Creates a cursor positioned at the start of the collection.
    pub fn new(
        source: &'a dyn DocumentSource,
        spec: &'a EntityTypeSpec,
        page_size: usize,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            source,
            spec,
            retry,
            page_size: page_size.max(1),
            offset: 0,
            total_count: 0,
            exhausted: false,
        }
    }

    /// Offset of the next page.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Last total-count hint reported by the source.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Returns true once an empty page has been received.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetches the next page. An empty page marks the end of the
    /// collection; every later call returns an empty page without touching
    /// the source.
    ///
    /// # Errors
    ///
    /// Propagates the source failure once the retry budget is spent.
    pub async fn next_page(&mut self) -> Result<SourcePage> {
        if self.exhausted {
            return Ok(SourcePage {
                total_count: self.total_count,
                ..SourcePage::default()
            });
        }

        let request = PageRequest {
            collection: &self.spec.source_collection,
            offset: self.offset,
            limit: self.page_size,
            order_by: &self.spec.order_by,
        };
        let operation = format!("fetch {}@{}", self.spec.source_collection, self.offset);
        let source = self.source;
        let request = &request;
        let page = with_retry(self.retry, &operation, move || source.fetch_page(request)).await?;

        if page.item_count() > self.page_size {
            return Err(Error::Extraction(format!(
                "collection '{}' returned {} items for a page of {}",
                self.spec.source_collection,
                page.item_count(),
                self.page_size
            )));
        }

        self.total_count = page.total_count;
        if page.is_end() {
            self.exhausted = true;
            debug!(collection = %self.spec.source_collection, offset = self.offset, "End of collection");
        } else {
            self.offset += page.item_count() as u64;
        }

        Ok(page)
    }
}
