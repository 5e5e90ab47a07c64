//! HTTP transport over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::transport::{Envelope, Method, OutboundRequest, Transport};

/// Transport that talks to the uBill API over HTTPS.
///
/// Every outcome becomes an [`Envelope`]: connection failures, timeouts,
/// non-2xx statuses and malformed bodies all resolve, never panic or
/// propagate. Session handling lives outside this crate; the embedding app
/// injects auth via [`HttpTransport::with_default_header`].
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  default_headers: Vec<(String, String)>,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let mut base_url = Url::parse(&config.url)
      .map_err(|e| eyre!("Failed to parse API base URL {}: {}", config.url, e))?;
    // endpoints join as relative paths
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      default_headers: Vec::new(),
    })
  }

  /// Attach a header to every request, e.g. an Authorization token.
  pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.default_headers.push((name.into(), value.into()));
    self
  }

  fn join(&self, endpoint: &str) -> Result<Url, url::ParseError> {
    self.base_url.join(endpoint.trim_start_matches('/'))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn request(&self, request: OutboundRequest) -> Envelope {
    let url = match self.join(&request.endpoint) {
      Ok(url) => url,
      Err(e) => {
        warn!(endpoint = %request.endpoint, error = %e, "invalid endpoint");
        return Envelope::fail(None, format!("invalid endpoint {}: {}", request.endpoint, e));
      }
    };

    let mut builder = match request.method {
      Method::Get => self.client.get(url.clone()),
      Method::Post => self.client.post(url.clone()),
      Method::Put => self.client.put(url.clone()),
      Method::Delete => self.client.delete(url.clone()),
    };
    for (name, value) in &self.default_headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(timeout_ms) = request.timeout_ms {
      builder = builder.timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = match builder.send().await {
      Ok(response) => response,
      Err(e) => {
        warn!(method = request.method.as_str(), url = %url, error = %e, "request failed to send");
        return Envelope::fail(None, format!("request failed: {e}"));
      }
    };

    let status = response.status();
    let body = match response.text().await {
      Ok(text) => text,
      Err(e) => {
        return Envelope::fail(
          Some(status.as_u16()),
          format!("failed to read response body: {e}"),
        )
      }
    };

    if !status.is_success() {
      debug!(status = status.as_u16(), url = %url, "non-success response");
      let detail = extract_error_message(&body).unwrap_or_else(|| status.to_string());
      return Envelope::fail(Some(status.as_u16()), detail);
    }

    if body.trim().is_empty() {
      return Envelope {
        success: true,
        status: Some(status.as_u16()),
        data: None,
        error: None,
      };
    }

    match serde_json::from_str(&body) {
      Ok(value) => envelope_from_body(status.as_u16(), value),
      Err(e) => Envelope::fail(
        Some(status.as_u16()),
        format!("response was not valid JSON: {e}"),
      ),
    }
  }
}

/// The API wraps payloads as `{ success, data, error }`. Mirror that shape
/// when present; a bare body is the payload itself.
fn envelope_from_body(status: u16, value: Value) -> Envelope {
  match value {
    Value::Object(ref fields) if fields.contains_key("success") => {
      let success = fields
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
      let data = fields.get("data").cloned();
      let error = fields
        .get("error")
        .or_else(|| fields.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string);
      Envelope {
        success,
        status: Some(status),
        data,
        error,
      }
    }
    other => Envelope {
      success: true,
      status: Some(status),
      data: Some(other),
      error: None,
    },
  }
}

/// Pull a human-readable message out of a JSON error body, if any.
fn extract_error_message(body: &str) -> Option<String> {
  let value: Value = serde_json::from_str(body).ok()?;
  value
    .get("error")
    .or_else(|| value.get("message"))
    .and_then(Value::as_str)
    .map(str::to_string)
}
