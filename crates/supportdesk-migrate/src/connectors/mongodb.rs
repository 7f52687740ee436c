//! MongoDB source connector.
//!
//! Reads collections through the MongoDB Data API (REST) so no native driver
//! is needed. Pages are requested with `find` sorted by the creation
//! timestamp (then `_id` to break ties), collection sizes with an `aggregate`
//! `$count` pipeline.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::connectors::common::{
    create_http_client, handle_http_error, parse_retry_after, validate_url,
};
use crate::connectors::{split_documents, DocumentSource, PageRequest, SourcePage};
use crate::error::{Error, Result};

/// Configuration for a MongoDB Data API source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoDbConfig {
    /// MongoDB Data API endpoint URL.
    /// Format: https://data.mongodb-api.com/app/<app-id>/endpoint/data/v1
    pub data_api_url: String,
    /// MongoDB Data API key.
    pub api_key: String,
    /// Database name.
    pub database: String,
    /// Cluster name as known to the Data API.
    #[serde(default = "default_data_source")]
    pub data_source: String,
}

pub(crate) fn default_data_source() -> String {
    "mongodb-atlas".to_string()
}

/// Request body for the Data API `find` action.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindRequest<'a> {
    data_source: &'a str,
    database: &'a str,
    collection: &'a str,
    filter: Value,
    sort: Value,
    skip: u64,
    limit: u64,
}

/// Response from the `find` action.
#[derive(Debug, Deserialize)]
struct FindResponse {
    documents: Vec<Value>,
}

/// Request body for the `aggregate` action (used for counting).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateRequest<'a> {
    data_source: &'a str,
    database: &'a str,
    collection: &'a str,
    pipeline: Vec<Value>,
}

/// Response from the `aggregate` action.
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    documents: Vec<Value>,
}

/// MongoDB Data API source.
pub struct MongoDbSource {
    config: MongoDbConfig,
    client: Client,
    /// Collection sizes seen so far, refreshed by [`DocumentSource::ping`].
    counts: Mutex<HashMap<String, u64>>,
}

impl MongoDbSource {
    /// Creates a new source with a configured HTTP client.
    pub fn new(config: MongoDbConfig) -> Self {
        Self {
            config,
            client: create_http_client(),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the API URL for a specific action.
    fn build_url(&self, action: &str) -> String {
        format!(
            "{}/action/{}",
            self.config.data_api_url.trim_end_matches('/'),
            action
        )
    }

    fn find_request<'a>(&'a self, request: &PageRequest<'a>) -> FindRequest<'a> {
        FindRequest {
            data_source: &self.config.data_source,
            database: &self.config.database,
            collection: request.collection,
            filter: serde_json::json!({}),
            sort: serde_json::json!({ (request.order_by): 1, "_id": 1 }),
            skip: request.offset,
            limit: request.limit as u64,
        }
    }

    /// Makes a POST request to the MongoDB Data API.
    async fn api_request<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        body: &T,
    ) -> Result<R> {
        let url = self.build_url(action);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::SourceConnection(format!("MongoDB API request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok());
            return Err(Error::RateLimit(parse_retry_after(retry_after)));
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(handle_http_error(status.as_u16(), &body, "MongoDB"));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to parse MongoDB response: {}", e)))
    }

    /// Counts the documents of a collection and caches the result.
    async fn count(&self, collection: &str) -> Result<u64> {
        let request = AggregateRequest {
            data_source: &self.config.data_source,
            database: &self.config.database,
            collection,
            pipeline: vec![serde_json::json!({ "$count": "total" })],
        };

        let response: AggregateResponse = self.api_request("aggregate", &request).await?;
        let total = response
            .documents
            .first()
            .and_then(|doc| doc.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        if let Ok(mut counts) = self.counts.lock() {
            counts.insert(collection.to_string(), total);
        }
        Ok(total)
    }

    fn cached_count(&self, collection: &str) -> Option<u64> {
        self.counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(collection).copied())
    }
}

#[async_trait]
impl DocumentSource for MongoDbSource {
    fn source_type(&self) -> &'static str {
        "mongodb"
    }

    async fn connect(&mut self) -> Result<()> {
        validate_url(&self.config.data_api_url)?;
        if self.config.database.is_empty() {
            return Err(Error::Config("MongoDB database name is empty".to_string()));
        }
        debug!(url = %self.config.data_api_url, database = %self.config.database, "MongoDB source ready");
        Ok(())
    }

    async fn ping(&self, collection: &str) -> Result<u64> {
        self.count(collection).await
    }

    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<SourcePage> {
        let total_count = match self.cached_count(request.collection) {
            Some(total) => total,
            None => self.count(request.collection).await?,
        };

        let body = self.find_request(request);
        let response: FindResponse = self.api_request("find", &body).await?;
        let (records, rejected) =
            split_documents(request.collection, request.offset, response.documents);

        debug!(
            collection = request.collection,
            offset = request.offset,
            fetched = records.len(),
            rejected = rejected.len(),
            "Fetched page"
        );

        Ok(SourcePage {
            records,
            rejected,
            total_count,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Ok(mut counts) = self.counts.lock() {
            counts.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "mongodb_tests.rs"]
mod tests;
