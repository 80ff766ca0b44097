use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::batch::MatrixFetch;
use crate::domain::{MatrixQuery, MetagenomeId};
use crate::error::MgError;
use crate::matrix::{DenseTable, SparseMatrix};
use crate::normalize::{check_contract, NormalizeBackend};

pub const DEFAULT_API_URL: &str = "https://api.mg-rast.org";

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: usize = 720;

/// Returns ontology records for a source, keyed by level name. Implemented by
/// the HTTP client; tests substitute mocks.
pub trait OntologyLookup: Send + Sync {
    fn ontology(&self, min_level: &str, source: &str) -> Result<Vec<Value>, MgError>;
}

/// Blocking client for the analytics API: matrix retrieval (asynchronous jobs
/// polled to completion), ontology lookups and remote normalization.
#[derive(Clone)]
pub struct MgrastHttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl MgrastHttpClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, MgError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mg-compare-tools/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MgError::Fetch(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| MgError::Fetch(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get_json(&self, url: &str, pairs: &[(String, String)]) -> Result<Value, MgError> {
        let mut request = self.client.get(url).query(pairs);
        if let Some(token) = &self.token {
            request = request.header("auth", token);
        }
        let response = request
            .send()
            .map_err(|err| MgError::Fetch(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "matrix request failed".to_string());
            return Err(MgError::FetchStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| MgError::Fetch(format!("invalid JSON response: {err}")))?;
        if let Some(message) = body.get("ERROR").and_then(Value::as_str) {
            return Err(MgError::Fetch(message.to_string()));
        }
        Ok(body)
    }

    /// Submits an asynchronous query and polls the job url until the service
    /// reports it done, then returns the job's `data` payload. A response
    /// without a `status` field is already the payload.
    fn get_async(&self, url: &str, pairs: &[(String, String)]) -> Result<Value, MgError> {
        let mut body = self.get_json(url, pairs)?;
        let mut polls = 0usize;
        loop {
            let Some(status) = body.get("status").and_then(Value::as_str) else {
                return Ok(body);
            };
            if status == "done" {
                return body
                    .get_mut("data")
                    .map(Value::take)
                    .ok_or_else(|| MgError::Fetch("job done but carries no data".to_string()));
            }
            let poll_url = body
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| MgError::Fetch(format!("job status {status} without poll url")))?
                .to_string();
            polls += 1;
            if polls > MAX_POLLS {
                return Err(MgError::Fetch(format!(
                    "job still {status} after {MAX_POLLS} polls"
                )));
            }
            tracing::debug!(status, poll = polls, "waiting for asynchronous job");
            thread::sleep(POLL_INTERVAL);
            body = self.get_json(&poll_url, &[])?;
        }
    }
}

impl MatrixFetch for MgrastHttpClient {
    fn fetch_matrix(
        &self,
        query: &MatrixQuery,
        ids: &[MetagenomeId],
    ) -> Result<SparseMatrix, MgError> {
        let mut pairs = query.query_pairs();
        for id in ids {
            pairs.push(("id".to_string(), id.as_str().to_string()));
        }
        let url = format!("{}/matrix/function", self.base_url);
        tracing::info!(ids = ids.len(), "requesting abundance matrix");
        let payload = self.get_async(&url, &pairs)?;
        SparseMatrix::from_value(payload)
            .map_err(|err| MgError::Fetch(format!("matrix response: {err}")))
    }
}

impl OntologyLookup for MgrastHttpClient {
    fn ontology(&self, min_level: &str, source: &str) -> Result<Vec<Value>, MgError> {
        let pairs = vec![
            ("version".to_string(), "1".to_string()),
            ("min_level".to_string(), min_level.to_string()),
            ("source".to_string(), source.to_string()),
        ];
        let url = format!("{}/m5nr/ontology", self.base_url);
        let body = self
            .get_json(&url, &pairs)
            .map_err(|err| MgError::Ontology(err.to_string()))?;
        match body.get("data") {
            Some(Value::Array(records)) => Ok(records.clone()),
            _ => Err(MgError::Ontology(
                "response carries no data array".to_string(),
            )),
        }
    }
}

impl NormalizeBackend for MgrastHttpClient {
    fn normalize(&self, table: &DenseTable) -> Result<DenseTable, MgError> {
        let url = format!("{}/compute/normalize", self.base_url);
        let mut request = self.client.post(&url).json(table);
        if let Some(token) = &self.token {
            request = request.header("auth", token);
        }
        tracing::info!(rows = table.rows.len(), "requesting remote normalization");
        let response = request
            .send()
            .map_err(|err| MgError::RemoteCompute(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "normalization request failed".to_string());
            return Err(MgError::RemoteCompute(format!("status {status}: {message}")));
        }
        let normalized: DenseTable = response
            .json()
            .map_err(|err| MgError::RemoteCompute(format!("malformed response: {err}")))?;
        check_contract(table, &normalized).map_err(MgError::RemoteCompute)?;
        Ok(normalized)
    }
}
