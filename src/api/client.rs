// HTTP transport for the simple API.
// Executes one request and decodes its JSON body; envelope checks happen upstream.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client,
    header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT},
};
use serde_json::Value;
use tracing::debug;

use crate::error::{GlitchError, Result};

use super::types::HttpRequest;

pub const DEFAULT_BASE_URL: &str = "http://api.glitch.com/simple/";

/// Executes a single request and returns the decoded JSON body.
///
/// Implementations never retry: a failure is reported once and the caller
/// decides what to do with it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<Value>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("glitchq"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(GlitchError::Transport)?;

        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };

        Ok(Self { client, base_url })
    }

    /// Full URL for an endpoint such as `skills.listAll`.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn map_send_error(&self, endpoint: &str, error: reqwest::Error) -> GlitchError {
        if error.is_timeout() {
            GlitchError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            GlitchError::Transport(error)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &HttpRequest) -> Result<Value> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GlitchError::Other(e.to_string()))?;
            headers.insert(name, HeaderValue::from_str(value)?);
        }

        debug!(endpoint = %request.endpoint, "sending request");
        let response = self
            .client
            .get(self.url(&request.endpoint))
            .headers(headers)
            .query(&request.params)
            .send()
            .await
            .map_err(|e| self.map_send_error(&request.endpoint, e))?;

        let status_error = response.error_for_status_ref().err();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(&request.endpoint, e))?;

        match (serde_json::from_slice::<Value>(&body), status_error) {
            (Ok(value), None) => Ok(value),
            // Error statuses that still carry an envelope are left to the envelope check.
            (Ok(value), Some(_)) if value.get("ok").is_some() => Ok(value),
            (_, Some(error)) => Err(GlitchError::Transport(error)),
            (Err(source), None) => Err(GlitchError::MalformedBody {
                endpoint: request.endpoint.clone(),
                source,
            }),
        }
    }
}
