//! JSON dump source connector.
//!
//! Reads a directory holding one `<collection>.json` file per collection,
//! each a JSON array of documents (the format produced by
//! `mongoexport --jsonArray`). Collections are loaded lazily, sorted once by
//! their creation-timestamp field and then paged from memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::connectors::{split_documents, DocumentSource, PageRequest, SourcePage};
use crate::error::{Error, Result};
use crate::transform::{lookup, parse_datetime};

/// Configuration for a JSON dump source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonDumpConfig {
    /// Directory containing `<collection>.json` files.
    pub path: PathBuf,
}

type Collection = Arc<Vec<Value>>;

/// Source reading exported collections from disk or memory.
pub struct JsonDumpSource {
    config: JsonDumpConfig,
    /// Raw items per collection, in file order.
    raw: Mutex<HashMap<String, Collection>>,
    /// Sorted views keyed by `(collection, order_by)`.
    sorted: Mutex<HashMap<(String, String), Collection>>,
    in_memory: bool,
}

impl JsonDumpSource {
    /// Creates a source over a dump directory.
    #[must_use]
    pub fn new(config: JsonDumpConfig) -> Self {
        Self {
            config,
            raw: Mutex::new(HashMap::new()),
            sorted: Mutex::new(HashMap::new()),
            in_memory: false,
        }
    }

    /// Creates a source over in-memory collections. Collections not present
    /// in the map are empty.
    #[must_use]
    pub fn from_collections(collections: HashMap<String, Vec<Value>>) -> Self {
        let raw = collections
            .into_iter()
            .map(|(name, items)| (name, Arc::new(items)))
            .collect();
        Self {
            config: JsonDumpConfig {
                path: PathBuf::new(),
            },
            raw: Mutex::new(raw),
            sorted: Mutex::new(HashMap::new()),
            in_memory: true,
        }
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.config.path.join(format!("{}.json", collection))
    }

    /// Loads a collection file, caching the result.
    fn load(&self, collection: &str) -> Result<Collection> {
        if let Some(cached) = self.raw.lock().ok().and_then(|raw| raw.get(collection).cloned()) {
            return Ok(cached);
        }
        if self.in_memory {
            return Ok(Arc::new(Vec::new()));
        }

        let path = self.collection_path(collection);
        let records = if path.exists() {
            let file = File::open(&path).map_err(|e| {
                Error::SourceConnection(format!("Cannot open {}: {}", path.display(), e))
            })?;
            let root: Value = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                Error::Extraction(format!("Invalid JSON in {}: {}", path.display(), e))
            })?;
            match root {
                Value::Array(items) => items,
                _ => {
                    return Err(Error::Extraction(format!(
                        "{} must contain a JSON array of documents",
                        path.display()
                    )))
                }
            }
        } else {
            debug!(path = %path.display(), "Collection file absent, treating as empty");
            Vec::new()
        };

        let records = Arc::new(records);
        if let Ok(mut raw) = self.raw.lock() {
            raw.insert(collection.to_string(), Arc::clone(&records));
        }
        Ok(records)
    }

    /// Returns the collection sorted by `order_by`, caching the result.
    fn sorted(&self, collection: &str, order_by: &str) -> Result<Collection> {
        let key = (collection.to_string(), order_by.to_string());
        if let Some(cached) = self.sorted.lock().ok().and_then(|s| s.get(&key).cloned()) {
            return Ok(cached);
        }

        let mut records: Vec<Value> = self.load(collection)?.as_ref().clone();
        // Stable: records with equal or missing timestamps keep file order.
        records.sort_by_cached_key(|item| sort_key(item, order_by));

        let records = Arc::new(records);
        if let Ok(mut sorted) = self.sorted.lock() {
            sorted.insert(key, Arc::clone(&records));
        }
        Ok(records)
    }
}

/// Sort key placing items without a parseable timestamp first, as an
/// ascending MongoDB sort places missing and null values.
fn sort_key(item: &Value, order_by: &str) -> Option<i64> {
    item.as_object()
        .and_then(|record| lookup(record, order_by))
        .and_then(timestamp_millis)
}

fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => parse_datetime(s).map(|dt| dt.timestamp_millis()),
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => match map.get("$date") {
            Some(inner) => timestamp_millis(inner),
            None => map
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
        },
        _ => None,
    }
}

#[async_trait]
impl DocumentSource for JsonDumpSource {
    fn source_type(&self) -> &'static str {
        "json_dump"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.in_memory {
            return Ok(());
        }
        if !self.config.path.is_dir() {
            return Err(Error::SourceConnection(format!(
                "Dump directory not found: {}",
                self.config.path.display()
            )));
        }
        debug!(path = %self.config.path.display(), "JSON dump source ready");
        Ok(())
    }

    async fn ping(&self, collection: &str) -> Result<u64> {
        Ok(self.load(collection)?.len() as u64)
    }

    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<SourcePage> {
        let records = self.sorted(request.collection, request.order_by)?;
        let start = usize::try_from(request.offset)
            .unwrap_or(usize::MAX)
            .min(records.len());
        let end = start.saturating_add(request.limit).min(records.len());

        let (page, rejected) =
            split_documents(request.collection, start as u64, records[start..end].to_vec());

        Ok(SourcePage {
            records: page,
            rejected,
            total_count: records.len() as u64,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Ok(mut sorted) = self.sorted.lock() {
            sorted.clear();
        }
        if !self.in_memory {
            if let Ok(mut raw) = self.raw.lock() {
                raw.clear();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "json_dump_tests.rs"]
mod tests;
