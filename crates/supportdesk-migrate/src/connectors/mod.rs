//! Source connectors for document stores.

pub mod common;
pub mod json_dump;
pub mod mongodb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::transform::RawRecord;

/// One page request against a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest<'a> {
    /// Collection name.
    pub collection: &'a str,
    /// Number of records to skip.
    pub offset: u64,
    /// Maximum number of records to return.
    pub limit: usize,
    /// Creation-timestamp field used for stable ordering.
    pub order_by: &'a str,
}

/// A page of raw records.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    /// Records in this page, ordered by creation time.
    pub records: Vec<RawRecord>,
    /// Items of this page that are not documents, one message each. They
    /// occupy collection positions like records do.
    pub rejected: Vec<String>,
    /// Total number of records in the collection (hint).
    pub total_count: u64,
}

impl SourcePage {
    /// Returns true when the collection is exhausted.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.records.is_empty() && self.rejected.is_empty()
    }

    /// Collection positions consumed by this page.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

/// Splits the items of a page starting at `offset` into records and
/// rejections for items that are not documents.
pub(crate) fn split_documents(
    collection: &str,
    offset: u64,
    items: Vec<Value>,
) -> (Vec<RawRecord>, Vec<String>) {
    let mut records = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();
    for (position, item) in (offset..).zip(items) {
        match item {
            Value::Object(map) => records.push(map),
            other => rejected.push(format!(
                "{} item {} is not a document: {}",
                collection, position, other
            )),
        }
    }
    (records, rejected)
}

/// Count of one collection, as reported by a pre-flight probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionProbe {
    /// Collection name.
    pub collection: String,
    /// Number of records.
    pub count: u64,
}

/// Trait for source document stores.
///
/// Implement this trait to add support for a new source.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Get the source type name.
    fn source_type(&self) -> &'static str;

    /// Connect to the source and validate configuration.
    async fn connect(&mut self) -> Result<()>;

    /// Count the records of a collection. Used for pre-flight probes and
    /// count reconciliation.
    async fn ping(&self, collection: &str) -> Result<u64>;

    /// Fetch one page, ordered by the request's creation-timestamp field
    /// ascending. An empty page signals the end of the collection.
    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<SourcePage>;

    /// Close the connection and cleanup resources.
    async fn close(&mut self) -> Result<()>;
}

/// Create a source from configuration.
pub fn create_source(config: &crate::config::SourceConfig) -> Result<Box<dyn DocumentSource>> {
    match config {
        crate::config::SourceConfig::MongoDB(cfg) => {
            Ok(Box::new(mongodb::MongoDbSource::new(cfg.clone())))
        }
        crate::config::SourceConfig::JsonDump(cfg) => {
            Ok(Box::new(json_dump::JsonDumpSource::new(cfg.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_page_is_end() {
        let page = SourcePage {
            total_count: 12,
            ..SourcePage::default()
        };
        assert!(page.is_end());
        assert_eq!(page.total_count, 12);
    }

    #[test]
    fn test_page_of_rejected_items_is_not_end() {
        let (records, rejected) =
            split_documents("tickets", 40, vec![json!({"_id": "t1"}), json!(42), json!(null)]);
        assert_eq!(records.len(), 1);
        assert_eq!(
            rejected,
            vec![
                "tickets item 41 is not a document: 42".to_string(),
                "tickets item 42 is not a document: null".to_string(),
            ]
        );

        let page = SourcePage {
            records: Vec::new(),
            rejected,
            total_count: 3,
        };
        assert!(!page.is_end());
        assert_eq!(page.item_count(), 2);
    }

    #[test]
    fn test_create_source_from_config() {
        let config = crate::config::SourceConfig::JsonDump(json_dump::JsonDumpConfig {
            path: std::path::PathBuf::from("./dump"),
        });
        let source = create_source(&config).unwrap();
        assert_eq!(source.source_type(), "json_dump");
    }
}
