// src/sink/http.rs
//! Remote HTTP sink
//!
//! POSTs each batch as a JSON array of events. Response statuses map onto
//! the sink error classes:
//!
//! - 2xx: accepted
//! - 401/403: permission (terminal)
//! - 400/413/422: serialization (terminal, the payload itself was rejected)
//! - anything else, timeouts and connection errors: unavailable (retried)

use crate::recording::buffer::Batch;
use crate::sink::{Ack, Sink};
use crate::utils::errors::{Result, SinkError, TelemetryError};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// HTTP sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSinkConfig {
    /// `http://` endpoint accepting a JSON array of events
    pub endpoint: String,

    /// Sent as `Authorization: Bearer <token>`
    pub auth_token: Option<String>,

    /// Per-request timeout
    pub timeout_ms: u64,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/api/activity".to_string(),
            auth_token: None,
            timeout_ms: 10_000,
        }
    }
}

/// Sink delivering batches to a remote endpoint
pub struct HttpSink {
    config: HttpSinkConfig,
    uri: Uri,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self> {
        let uri: Uri = config.endpoint.parse().map_err(|e| {
            TelemetryError::ConfigError(format!("Invalid endpoint {:?}: {}", config.endpoint, e))
        })?;

        if uri.scheme_str() != Some("http") || uri.host().is_none() {
            return Err(TelemetryError::ConfigError(format!(
                "Endpoint must be an absolute http:// URI, got {:?}",
                config.endpoint
            )));
        }

        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            config,
            uri,
            client,
        })
    }

    pub fn endpoint(&self) -> &Uri {
        &self.uri
    }

    fn build_request(&self, body: Vec<u8>) -> std::result::Result<Request<Full<Bytes>>, SinkError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = &self.config.auth_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| SinkError::Serialization(format!("Request build error: {}", e)))
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn write(&self, batch: &Batch) -> std::result::Result<Ack, SinkError> {
        let body = serde_json::to_vec(batch.events())
            .map_err(|e| SinkError::Serialization(format!("JSON encoding error: {}", e)))?;
        let request = self.build_request(body)?;

        // One deadline covers the headers and the body drain
        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| SinkError::Unavailable(format!("Request failed: {}", e)))?;
            let status = response.status();
            response
                .into_body()
                .collect()
                .await
                .map_err(|e| SinkError::Unavailable(format!("Response body failed: {}", e)))?;
            Ok::<_, SinkError>(status)
        };

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let status = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| SinkError::Unavailable(format!("Request timed out after {:?}", timeout)))??;

        debug!("POST {} -> {} ({} events)", self.uri, status, batch.len());
        classify_status(status)?;

        Ok(Ack {
            accepted: batch.len(),
        })
    }
}

fn classify_status(status: StatusCode) -> std::result::Result<(), SinkError> {
    if status.is_success() {
        return Ok(());
    }
    let reason = format!("endpoint responded {}", status);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SinkError::Permission(reason),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            SinkError::Serialization(reason)
        }
        _ => SinkError::Unavailable(reason),
    })
}
