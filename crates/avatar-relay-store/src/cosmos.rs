use crate::auth::{http_date, master_key_token};
use crate::config::StoreConfig;
use crate::error::StoreError;
use futures_util::future::try_join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const API_VERSION: &str = "2018-12-31";
const PARTITION_RANGE_HEADER: &str = "x-ms-documentdb-partitionkeyrangeid";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PartitionKeyRange {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PartitionKeyRangesResponse {
    #[serde(rename = "PartitionKeyRanges", default)]
    ranges: Vec<PartitionKeyRange>,
}

/// Minimal SQL query client for one container.
///
/// The gateway refuses cross-partition queries that need a merge step
/// (`ORDER BY`, `TOP`, `OFFSET ... LIMIT`), so queries run once per
/// partition key range and the caller merges the per-range results.
#[derive(Debug, Clone)]
pub struct CosmosClient {
    http: reqwest::Client,
    config: StoreConfig,
}

/// Turns a non-success reply into [`StoreError::Http`], preferring the
/// store's own `message` field over the raw body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    warn!(status = status.as_u16(), "document store request failed");
    Err(StoreError::Http {
        status: status.as_u16(),
        message,
    })
}

impl CosmosClient {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: StoreConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn collection_url(&self, resource: &str) -> String {
        format!(
            "{}/{}/{resource}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.collection_link()
        )
    }

    fn ensure_configured(&self) -> Result<(), StoreError> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(StoreError::Config(
                "document store endpoint, key, database and container must all be set".into(),
            ))
        }
    }

    fn signed(
        &self,
        request: reqwest::RequestBuilder,
        verb: &str,
        resource_type: &str,
    ) -> Result<reqwest::RequestBuilder, StoreError> {
        let date = http_date(chrono::Utc::now());
        let authorization = master_key_token(
            verb,
            resource_type,
            &self.config.collection_link(),
            &date,
            &self.config.key,
        )?;
        Ok(request
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION))
    }

    /// Ids of the container's partition key ranges.
    pub async fn partition_key_ranges(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_configured()?;

        let request = self.signed(
            self.http.get(self.collection_url("pkranges")),
            "get",
            "pkranges",
        )?;
        let response = check_status(request.send().await?).await?;
        let parsed: PartitionKeyRangesResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(parsed.ranges.into_iter().map(|range| range.id).collect())
    }

    /// Runs a query against a single partition key range and returns its
    /// first page of documents.
    pub async fn query_range(&self, query: &str, range_id: &str) -> Result<Vec<Value>, StoreError> {
        self.ensure_configured()?;

        let request = self
            .signed(self.http.post(self.collection_url("docs")), "post", "docs")?
            .header("x-ms-documentdb-isquery", "True")
            .header("x-ms-documentdb-query-enablecrosspartition", "True")
            .header(PARTITION_RANGE_HEADER, range_id)
            .header(reqwest::header::CONTENT_TYPE, "application/query+json")
            .json(&json!({ "query": query, "parameters": [] }));

        let response = check_status(request.send().await?).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        debug!(range = %range_id, count = parsed.documents.len(), "document store query returned");
        Ok(parsed.documents)
    }

    /// Runs a query on every partition key range concurrently and
    /// concatenates the results in range order.
    pub async fn query_documents(&self, query: &str) -> Result<Vec<Value>, StoreError> {
        let ranges = self.partition_key_ranges().await?;
        let pages = try_join_all(ranges.iter().map(|id| self.query_range(query, id))).await?;
        Ok(pages.into_iter().flatten().collect())
    }
}
