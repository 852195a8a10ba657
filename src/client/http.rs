//! HTTP Client
//!
//! reqwest-backed [`Transport`] for OpenAI-style completion endpoints.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::transport::{
    Endpoint, ResponseMode, Transport, TransportError, TransportRequest, TransportResponse,
};
use crate::config::ClientConfig;
use crate::error::{RelayError, Result};

/// HTTP transport bound to one API base URL and credential set
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Inner reqwest client
    client: Client,

    /// Base URL without a trailing slash
    base_url: String,

    /// Headers sent with every request
    headers: HeaderMap,
}

impl HttpClient {
    /// Create a new HTTP client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = config.get_api_key() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .map_err(|e| RelayError::Config(format!("Invalid API key format: {}", e)))?,
            );
        }

        if let Some(organization) = &config.organization {
            headers.insert(
                HeaderName::from_static("openai-organization"),
                HeaderValue::from_str(organization)
                    .map_err(|e| RelayError::Config(format!("Invalid organization: {}", e)))?,
            );
        }

        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| RelayError::Config(format!("Invalid header name {}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RelayError::Config(format!("Invalid value for header {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RelayError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.get_base_url().trim_end_matches('/').to_string(),
            headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    async fn execute(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .post(self.url(request.endpoint))
            .headers(self.headers.clone())
            .json(&request.body);

        for (key, value) in &request.options.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(timeout) = request.options.timeout {
            builder = builder.timeout(timeout);
        }
        if request.mode == ResponseMode::Stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        debug!(status = status.as_u16(), endpoint = request.endpoint.path(), "response received");

        if request.mode == ResponseMode::Stream && status == StatusCode::OK {
            let mut byte_stream = response.bytes_stream();
            let body = stream! {
                loop {
                    let chunk = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        chunk = byte_stream.next() => chunk,
                    };
                    match chunk {
                        Some(chunk) => yield chunk.map_err(|e| TransportError::Stream(e.to_string())),
                        None => break,
                    }
                }
            };
            return Ok(TransportResponse::stream(status.as_u16(), Box::pin(body)));
        }

        let text = response.text().await.map_err(map_reqwest_error)?;
        if text.trim().is_empty() && status.is_success() {
            return Err(TransportError::NoResponse(format!(
                "empty body with status {}",
                status
            )));
        }

        // Error pages are not always JSON; keep them as a string payload.
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(TransportResponse::json(status.as_u16(), body))
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<TransportResponse, TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.execute(request, cancel.clone()) => result,
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_body() || err.is_decode() {
        TransportError::NoResponse(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}
