//! Durable HTTP requests.
//!
//! A durable request is retried on network failures and 5xx responses with
//! exponentially growing delays, returns as soon as the server answers with
//! one of the policy's success codes, and fails fast on any other status.
//!
//! ```no_run
//! # async fn demo() -> Result<(), clint_utilities::http::StoreError> {
//! use clint_utilities::http::make_durable_post;
//!
//! let body = serde_json::json!({ "resource": { "id": 1 } });
//! let response = make_durable_post("http://example.com/resource", 3, 1.0, &body).await?;
//! assert!(response.status().is_success() || response.status().as_u16() == 409);
//! # Ok(())
//! # }
//! ```

pub mod retry;

use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use retry::{send_durable, RetryPolicy, DEFAULT_SUCCESS_CODES, STORE_SUCCESS_CODES};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
    #[error("could not complete request due to status code {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("unable to complete request after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },
    #[error("request cancelled")]
    Cancelled,
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Failure of a store (POST) request. Wraps the underlying request failure.
#[derive(Debug, Error)]
#[error("store failed: {0}")]
pub struct StoreError(#[from] pub RequestError);

// ── Client ────────────────────────────────────────────────────────────────────

/// Thin wrapper over `reqwest::Client` that sends every request through
/// [`send_durable`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DurableClient {
    client: Client,
}

impl DurableClient {
    /// Build a client. `timeout` bounds each individual attempt, not the
    /// whole retry sequence.
    pub fn new(timeout: Option<Duration>) -> Result<Self, RequestError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| RequestError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Send `method url` with an optional JSON body under `policy`.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        json: Option<&Value>,
        policy: &RetryPolicy,
    ) -> Result<Response, RequestError> {
        send_durable(policy, |attempt| {
            debug!(attempt, method = %method, url, has_body = json.is_some(), "sending request");
            let mut request = self.client.request(method.clone(), url);
            if let Some(body) = json {
                request = request.json(body);
            }
            request.send()
        })
        .await
    }

    pub async fn get(&self, url: &str, policy: &RetryPolicy) -> Result<Response, RequestError> {
        self.request(Method::GET, url, None, policy).await
    }

    /// POST `json` to `url`. Use [`RetryPolicy::store`] to accept
    /// `409 Conflict` as "already stored".
    pub async fn post(
        &self,
        url: &str,
        json: &Value,
        policy: &RetryPolicy,
    ) -> Result<Response, StoreError> {
        Ok(self.request(Method::POST, url, Some(json), policy).await?)
    }
}

// ── One-shot helpers ──────────────────────────────────────────────────────────

/// Durable request with the default success codes and a fresh client.
pub async fn make_durable_request(
    method: Method,
    url: &str,
    attempts: u32,
    delay_secs: f64,
    json: Option<&Value>,
) -> Result<Response, RequestError> {
    let policy = RetryPolicy::new(attempts, delay_secs)?;
    DurableClient::new(None)?
        .request(method, url, json, &policy)
        .await
}

pub async fn make_durable_get(
    url: &str,
    attempts: u32,
    delay_secs: f64,
) -> Result<Response, RequestError> {
    make_durable_request(Method::GET, url, attempts, delay_secs, None).await
}

/// Durable POST where `201 Created` and `409 Conflict` both count as stored.
pub async fn make_durable_post(
    url: &str,
    attempts: u32,
    delay_secs: f64,
    json: &Value,
) -> Result<Response, StoreError> {
    let policy = RetryPolicy::store(attempts, delay_secs)?;
    DurableClient::new(None)?.post(url, json, &policy).await
}
