//! Transport boundary: the one seam through which the sync layer talks to
//! the network.
//!
//! Implementations resolve every request, success and failure alike, into
//! an [`Envelope`], so the cache layer never has to sniff response shapes
//! and a transport hiccup can never panic its way through a store. Retry
//! and backoff policy belongs to the implementation, not to this layer.

use async_trait::async_trait;
use serde_json::Value;

/// HTTP method for an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

/// A request handed to the transport.
///
/// `endpoint` is relative to the transport's base URL. Tenant-scoped calls
/// must carry the tenant inside the endpoint or body: the coalescer keys
/// purely on the request signature and will happily merge identical calls
/// from different callers.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
  pub method: Method,
  pub endpoint: String,
  pub body: Option<Value>,
  pub timeout_ms: Option<u64>,
  pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
  pub fn get(endpoint: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      endpoint: endpoint.into(),
      body: None,
      timeout_ms: None,
      headers: Vec::new(),
    }
  }

  pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
    Self {
      method: Method::Post,
      endpoint: endpoint.into(),
      body: Some(body),
      timeout_ms: None,
      headers: Vec::new(),
    }
  }

  /// Set a per-request timeout in milliseconds.
  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

/// The single response shape produced at the transport boundary.
///
/// `success` is the only field the sync layer branches on; `data` carries
/// the decoded JSON payload on success, `error` a human-readable message on
/// failure. `status` is the HTTP status when one was received.
#[derive(Debug, Clone)]
pub struct Envelope {
  pub success: bool,
  pub status: Option<u16>,
  pub data: Option<Value>,
  pub error: Option<String>,
}

impl Envelope {
  /// Successful response with a payload.
  pub fn ok(data: Value) -> Self {
    Self {
      success: true,
      status: Some(200),
      data: Some(data),
      error: None,
    }
  }

  /// Successful response without a payload (e.g. 204 on a write).
  pub fn ok_empty() -> Self {
    Self {
      success: true,
      status: Some(204),
      data: None,
      error: None,
    }
  }

  /// Failed response. `status` is `None` when the failure happened before
  /// any HTTP status existed (connect error, timeout).
  pub fn fail(status: Option<u16>, error: impl Into<String>) -> Self {
    Self {
      success: false,
      status,
      data: None,
      error: Some(error.into()),
    }
  }

  /// Collapse the envelope into the payload or a [`TransportError`].
  ///
  /// A successful envelope without a body yields `Value::Null`.
  pub fn into_result(self) -> Result<Value, TransportError> {
    if self.success {
      Ok(self.data.unwrap_or(Value::Null))
    } else {
      Err(TransportError {
        status: self.status,
        message: self
          .error
          .unwrap_or_else(|| "request failed without detail".to_string()),
      })
    }
  }
}

/// A transport-level failure, cheap to clone into store state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
  pub status: Option<u16>,
  pub message: String,
}

impl std::fmt::Display for TransportError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.status {
      Some(status) => write!(f, "{} ({})", self.message, status),
      None => write!(f, "{}", self.message),
    }
  }
}

impl std::error::Error for TransportError {}

/// The only network primitive the sync layer uses.
///
/// Implementations must not panic and must not reject: every outcome is an
/// envelope. The production adapter lives in [`crate::http`]; tests inject
/// scripted fakes.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn request(&self, req: OutboundRequest) -> Envelope;
}
