//! PostgREST / edge-function client
//!
//! Blocking HTTP implementation of [`PageSource`] (paginated table reads) and
//! [`BatchSink`] (batch submission to the ingestion function).

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::fetch::{parse_content_range_total, Page, PageRange, PageSource, RowQuery};
use crate::ingest::BatchSink;
use crate::models::{IngestOutcome, Record};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const REST_BASE: &str = "/rest/v1";
const FUNCTIONS_BASE: &str = "/functions/v1";

/// Marker telling the ingestion function this is a manual batch push
pub const INGEST_MODE: &str = "manual";

#[derive(Debug, Serialize)]
struct IngestRequest<'a> {
    mode: &'static str,
    #[serde(rename = "yearData")]
    year_data: Vec<&'a Value>,
}

#[derive(Debug, Default, Deserialize)]
struct IngestResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    total_new_records: Option<u64>,
    #[serde(default)]
    total_updated_records: Option<u64>,
    #[serde(default)]
    results: Option<Vec<Value>>,
}

impl From<IngestResponse> for IngestOutcome {
    fn from(resp: IngestResponse) -> Self {
        IngestOutcome {
            accepted: resp.success.unwrap_or(false),
            new_count: resp.total_new_records.unwrap_or(0),
            updated_count: resp.total_updated_records.unwrap_or(0),
            results: resp.results.unwrap_or_default(),
        }
    }
}

/// Client for the project's REST and functions endpoints.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    ingest_function: String,
    read_timeout: Duration,
    ingest_timeout: Duration,
}

impl RestClient {
    pub fn new(config: &Config) -> Result<Self> {
        let token = config.credential.token();
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| SyncError::Config("API key is not a valid header value".into()))?,
        );
        headers.insert(
            "apikey",
            HeaderValue::from_str(token)
                .map_err(|_| SyncError::Config("API key is not a valid header value".into()))?,
        );

        let client = Client::builder()
            .timeout(config.read_timeout.max(config.ingest_timeout))
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ingest_function: config.ingest_function.clone(),
            read_timeout: config.read_timeout,
            ingest_timeout: config.ingest_timeout,
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn rows_url(&self, query: &RowQuery) -> String {
        self.url(&format!("{}/{}", REST_BASE, query.table.table))
    }

    fn ingest_url(&self) -> String {
        self.url(&format!("{}/{}", FUNCTIONS_BASE, self.ingest_function))
    }
}

/// Query-string parameters for a row query.
pub fn query_params(query: &RowQuery) -> Vec<(String, String)> {
    let mut qp: Vec<(String, String)> = Vec::with_capacity(4);
    qp.push(("select".to_string(), query.select.clone()));
    if query.distinct {
        qp.push(("distinct".to_string(), "true".to_string()));
    }
    if let Some(w) = &query.window {
        qp.push((w.column.clone(), format!("gte.{}", w.start.format("%Y-%m-%d"))));
        qp.push((w.column.clone(), format!("lt.{}", w.end.format("%Y-%m-%d"))));
    }
    qp
}

/// Map a non-success ingestion status onto the retry taxonomy.
pub fn classify_ingest_status(status: u16, body: String) -> SyncError {
    match status {
        401 => SyncError::Auth,
        s if s >= 500 => SyncError::Server { status: s, body },
        s => SyncError::Transport(format!("unexpected status {}: {}", s, body)),
    }
}

/// Map a non-success read status; reads are never retried.
///
/// Every status, 401 included, keeps its code and body.
pub fn classify_read_status(status: u16, body: String) -> SyncError {
    SyncError::Fetch { status, body }
}

fn body_text(resp: Response) -> String {
    resp.text().unwrap_or_default()
}

impl PageSource for RestClient {
    fn fetch_page(&self, query: &RowQuery, range: PageRange) -> Result<Page> {
        let resp = self
            .client
            .get(self.rows_url(query))
            .query(&query_params(query))
            .header("Accept-Profile", query.table.schema.as_str())
            .header("Prefer", "count=exact")
            .header("Range-Unit", "items")
            .header("Range", format!("{}-{}", range.from, range.to))
            .timeout(self.read_timeout)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_read_status(status.as_u16(), body_text(resp)));
        }

        let total = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        let text = resp.text()?;
        let rows: Vec<Value> = serde_json::from_str(&text).map_err(|e| {
            SyncError::Transport(format!("{}: malformed page body: {}", query.table, e))
        })?;

        Ok(Page { rows, total })
    }
}

impl BatchSink for RestClient {
    fn submit(&self, batch: &[Record]) -> Result<IngestOutcome> {
        let body = IngestRequest {
            mode: INGEST_MODE,
            year_data: batch.iter().map(|r| &r.payload).collect(),
        };

        let resp = self
            .client
            .post(self.ingest_url())
            .json(&body)
            .timeout(self.ingest_timeout)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_ingest_status(status.as_u16(), body_text(resp)));
        }

        let text = resp.text()?;
        let parsed: IngestResponse = serde_json::from_str(&text)
            .map_err(|e| SyncError::Transport(format!("malformed ingestion response: {}", e)))?;
        Ok(parsed.into())
    }
}
