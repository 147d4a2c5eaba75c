//! # Cube Collector Client
//!
//! Sends events to a Square Cube collector over HTTP. The collector accepts a
//! JSON array of events at `POST /1.0/event/put`, each shaped as
//! `{"type": ..., "time": ..., "data": {...}}`.
//!
//! The client is built on `reqwest_middleware` with an exponential-backoff
//! retry policy, so short collector hiccups are absorbed here and only
//! persistent failures reach the analytics sink.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::RelayError;
use crate::sinks::analytics::AnalyticsStore;

const PUT_PATH: &str = "1.0/event/put";

/// One event in the collector's wire format.
#[derive(Debug, Serialize)]
pub struct CubeEvent<'a> {
    #[serde(rename = "type")]
    pub event_type: &'a str,
    /// ISO-8601 timestamp; omitted to let the collector stamp arrival time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<&'a str>,
    pub data: &'a Map<String, Value>,
}

/// A Cube collector endpoint.
pub struct CubeCollector {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// Absolute URL of the put endpoint.
    put_url: Url,
}

impl CubeCollector {
    /// Creates a client for the collector at `http://{host}:{port}/`.
    ///
    /// # Errors
    /// Returns [`RelayError::Analytics`] if the host/port do not form a valid URL.
    pub fn new(host: &str, port: u16) -> Result<Self, RelayError> {
        let base = Url::parse(&format!("http://{}:{}/", host, port))
            .map_err(|e| RelayError::Analytics(format!("invalid collector address: {}", e)))?;
        Self::with_base_url(base)
    }

    /// Creates a client for a collector rooted at `base`.
    pub fn with_base_url(base: Url) -> Result<Self, RelayError> {
        let put_url = base
            .join(PUT_PATH)
            .map_err(|e| RelayError::Analytics(format!("invalid collector address: {}", e)))?;

        // Configure an exponential backoff policy with 3 retries
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RelayError::Analytics(format!("failed to build HTTP client: {}", e)))?;

        let inner = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner, put_url })
    }

    /// The endpoint events are posted to.
    pub fn put_url(&self) -> &Url {
        &self.put_url
    }

    /// Builds the request body for one event.
    pub fn body<'a>(event_type: &'a str, data: &'a Map<String, Value>) -> Vec<CubeEvent<'a>> {
        let time = data.get("time").and_then(Value::as_str);
        vec![CubeEvent { event_type, time, data }]
    }
}

#[async_trait]
impl AnalyticsStore for CubeCollector {
    async fn put(&self, event_type: &str, data: Map<String, Value>) -> Result<(), RelayError> {
        let body = serde_json::to_string(&Self::body(event_type, &data))
            .map_err(|e| RelayError::Analytics(format!("failed to encode event: {}", e)))?;

        let response = self
            .inner
            .post(self.put_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| RelayError::Analytics(format!("collector unreachable: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            log::debug!("Cube accepted '{}' event", event_type);
            return Ok(());
        }

        let error_body = response.text().await.unwrap_or_default();
        Err(RelayError::Analytics(format!(
            "collector rejected '{}' event with HTTP {}: {}",
            event_type,
            status.as_u16(),
            error_body
        )))
    }
}
