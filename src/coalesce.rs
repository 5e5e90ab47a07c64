//! Request coalescing and a short-lived successful-response cache.
//!
//! Concurrent identical requests collapse into one network call: the first
//! caller performs, every other caller awaits the same shared future. A
//! successful payload is then served from a small response cache until its
//! TTL elapses, so rapid-fire screens do not re-hit endpoints that just
//! answered. Failures are never cached.
//!
//! Keys are canonical request signatures (method, endpoint, serialized
//! body) and never include the tenant, so tenant-scoped calls must embed
//! the tenant in the endpoint or body.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::transport::{OutboundRequest, TransportError};

/// How long a successful response is served from cache by default.
pub const DEFAULT_RESPONSE_TTL_MS: u64 = 30_000;

/// Canonical identity of a request: SHA-256 over method, endpoint, and
/// serialized body. Headers and timeouts do not participate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
  pub fn of(req: &OutboundRequest) -> Self {
    let body = req
      .body
      .as_ref()
      .map(|b| b.to_string())
      .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(req.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(req.endpoint.as_bytes());
    hasher.update(b"\n");
    hasher.update(body.as_bytes());

    Signature(hex::encode(hasher.finalize()))
  }

  pub fn as_hex(&self) -> &str {
    &self.0
  }
}

/// Counters for observing coalescer behaviour in logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerStats {
  /// Served straight from the response cache.
  pub cache_hits: u64,
  /// Attached to an already in-flight identical request.
  pub joined_in_flight: u64,
  /// Actually performed against the transport.
  pub performed: u64,
}

#[derive(Default)]
struct Counters {
  hits: AtomicU64,
  joins: AtomicU64,
  misses: AtomicU64,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value, TransportError>>>;

struct CachedResponse {
  payload: Value,
  cached_at_ms: u64,
}

#[derive(Default)]
struct CoalescerInner {
  pending: HashMap<Signature, SharedFetch>,
  cached: HashMap<Signature, CachedResponse>,
}

impl CoalescerInner {
  /// Fresh cached payload for `signature`, dropping the entry if expired.
  /// Expiry is checked lazily here; there is no background sweeper.
  fn fresh_payload(&mut self, signature: &Signature, now_ms: u64, ttl_ms: u64) -> Option<Value> {
    match self.cached.get(signature) {
      Some(entry) if now_ms.saturating_sub(entry.cached_at_ms) < ttl_ms => {
        Some(entry.payload.clone())
      }
      Some(_) => {
        self.cached.remove(signature);
        None
      }
      None => None,
    }
  }
}

/// Deduplicates identical in-flight requests and serves a short-lived cache
/// of successful payloads.
///
/// One instance is shared by every store and client talking to the same
/// backend; the maps are keyed purely by request signature, never by tenant.
#[derive(Clone)]
pub struct RequestCoalescer {
  inner: Arc<Mutex<CoalescerInner>>,
  counters: Arc<Counters>,
  clock: Arc<dyn Clock>,
  ttl_ms: u64,
}

impl RequestCoalescer {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(CoalescerInner::default())),
      counters: Arc::new(Counters::default()),
      clock,
      ttl_ms: DEFAULT_RESPONSE_TTL_MS,
    }
  }

  /// Set the response-cache TTL. Zero disables response caching; in-flight
  /// deduplication still applies.
  pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
    self.ttl_ms = ttl_ms;
    self
  }

  /// Resolve a request through the coalescer.
  ///
  /// Precedence: an in-flight identical request is joined first; otherwise a
  /// non-expired cached payload is returned without performing; otherwise
  /// `perform` runs, registered so that every concurrent identical caller
  /// awaits its single settlement. On settlement the pending slot is always
  /// cleared; only success writes the response cache.
  pub async fn fetch<F, Fut>(
    &self,
    signature: Signature,
    perform: F,
  ) -> Result<Value, TransportError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
  {
    let now_ms = self.clock.now_ms();

    let shared = {
      let mut inner = self.inner.lock();

      if let Some(existing) = inner.pending.get(&signature) {
        self.counters.joins.fetch_add(1, Ordering::Relaxed);
        trace!(signature = signature.as_hex(), "joining in-flight request");
        existing.clone()
      } else if let Some(payload) = inner.fresh_payload(&signature, now_ms, self.ttl_ms) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        trace!(signature = signature.as_hex(), "served from response cache");
        return Ok(payload);
      } else {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.register(&mut inner, signature, perform())
      }
    };

    shared.await
  }

  /// Spawn `fut` as the single performer for `signature` and return the
  /// shared handle all callers await.
  ///
  /// The perform runs on its own task so it settles (and unregisters
  /// itself) even if every caller is dropped mid-await.
  fn register<Fut>(
    &self,
    inner: &mut CoalescerInner,
    signature: Signature,
    fut: Fut,
  ) -> SharedFetch
  where
    Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
  {
    let maps = Arc::clone(&self.inner);
    let clock = Arc::clone(&self.clock);
    let key = signature.clone();

    let task = tokio::spawn(async move {
      let result = fut.await;

      let mut guard = maps.lock();
      guard.pending.remove(&key);
      match &result {
        Ok(payload) => {
          guard.cached.insert(
            key,
            CachedResponse {
              payload: payload.clone(),
              cached_at_ms: clock.now_ms(),
            },
          );
        }
        Err(err) => {
          // Pending slot cleared, cache untouched: the next caller may
          // retry immediately or fall back to a previous success.
          debug!(signature = key.as_hex(), error = %err, "request failed, not cached");
        }
      }
      result
    });

    let maps = Arc::clone(&self.inner);
    let key = signature.clone();
    let shared = async move {
      match task.await {
        Ok(result) => result,
        Err(err) => {
          // The task unwound before clearing its own slot; clear it here
          // so the signature is retryable.
          maps.lock().pending.remove(&key);
          warn!(signature = key.as_hex(), error = %err, "request task failed");
          Err(TransportError {
            status: None,
            message: format!("request task failed: {err}"),
          })
        }
      }
    }
    .boxed()
    .shared();

    inner.pending.insert(signature, shared.clone());
    shared
  }

  pub fn stats(&self) -> CoalescerStats {
    CoalescerStats {
      cache_hits: self.counters.hits.load(Ordering::Relaxed),
      joined_in_flight: self.counters.joins.load(Ordering::Relaxed),
      performed: self.counters.misses.load(Ordering::Relaxed),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;
  use std::time::Duration;

  fn coalescer(clock: &ManualClock, ttl_ms: u64) -> RequestCoalescer {
    RequestCoalescer::new(Arc::new(clock.clone())).with_ttl_ms(ttl_ms)
  }

  fn sig(endpoint: &str) -> Signature {
    Signature::of(&OutboundRequest::get(endpoint))
  }

  #[test]
  fn test_signature_ignores_headers_but_not_body() {
    let plain = OutboundRequest::get("/consumers/42/summary");
    let with_header = OutboundRequest::get("/consumers/42/summary")
      .with_header("x-app-version", "3.1.0");
    assert_eq!(Signature::of(&plain), Signature::of(&with_header));

    let post_a = OutboundRequest::post("/ack", json!({"id": 1}));
    let post_b = OutboundRequest::post("/ack", json!({"id": 2}));
    assert_ne!(Signature::of(&post_a), Signature::of(&post_b));
    assert_ne!(Signature::of(&plain), Signature::of(&post_a));
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_identical_requests_perform_once() {
    let clock = ManualClock::new(0);
    let coalescer = coalescer(&clock, 30_000);
    let calls = Arc::new(AtomicU32::new(0));

    let perform = |calls: Arc<AtomicU32>| {
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!({"value": "fresh"}))
      }
    };

    let (a, b, c) = tokio::join!(
      coalescer.fetch(sig("/consumers/42/notifications"), perform(calls.clone())),
      coalescer.fetch(sig("/consumers/42/notifications"), perform(calls.clone())),
      coalescer.fetch(sig("/consumers/42/notifications"), perform(calls.clone())),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap(), json!({"value": "fresh"}));
    assert_eq!(b.unwrap(), json!({"value": "fresh"}));
    assert_eq!(c.unwrap(), json!({"value": "fresh"}));

    let stats = coalescer.stats();
    assert_eq!(stats.performed, 1);
    assert_eq!(stats.joined_in_flight, 2);
  }

  #[tokio::test]
  async fn test_response_cache_ttl_boundary() {
    let clock = ManualClock::new(0);
    let coalescer = coalescer(&clock, 30_000);
    let calls = Arc::new(AtomicU32::new(0));

    let perform = |calls: Arc<AtomicU32>| {
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!("payload"))
      }
    };

    coalescer
      .fetch(sig("/tariffs"), perform(calls.clone()))
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // One millisecond before expiry: served from cache.
    clock.advance(29_999);
    coalescer
      .fetch(sig("/tariffs"), perform(calls.clone()))
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // One millisecond past expiry: performed again.
    clock.advance(2);
    coalescer
      .fetch(sig("/tariffs"), perform(calls.clone()))
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = coalescer.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.performed, 2);
  }

  #[tokio::test]
  async fn test_failure_is_not_cached_and_clears_pending() {
    let clock = ManualClock::new(0);
    let coalescer = coalescer(&clock, 30_000);
    let calls = Arc::new(AtomicU32::new(0));

    let failing = {
      let calls = calls.clone();
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError {
          status: Some(500),
          message: "boom".to_string(),
        })
      }
    };

    let err = coalescer
      .fetch(sig("/consumers/42/summary"), failing)
      .await
      .unwrap_err();
    assert_eq!(err.status, Some(500));

    // The pending slot is gone, so a retry performs immediately and its
    // success is cached as usual.
    let succeeding = {
      let calls = calls.clone();
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!("recovered"))
      }
    };
    let value = coalescer
      .fetch(sig("/consumers/42/summary"), succeeding)
      .await
      .unwrap();
    assert_eq!(value, json!("recovered"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // And the cached success now serves without performing again.
    let counted = {
      let calls = calls.clone();
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!("should not be fetched"))
      }
    };
    let value = coalescer
      .fetch(sig("/consumers/42/summary"), counted)
      .await
      .unwrap();
    assert_eq!(value, json!("recovered"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_panicking_perform_clears_pending_for_retry() {
    let clock = ManualClock::new(0);
    let coalescer = coalescer(&clock, 30_000);

    let err = coalescer
      .fetch(sig("/consumers/42/summary"), || async {
        panic!("decoder bug")
      })
      .await
      .unwrap_err();
    assert_eq!(err.status, None);
    assert!(err.message.contains("request task failed"));

    // The signature is not wedged: a retry performs and succeeds.
    let value = coalescer
      .fetch(sig("/consumers/42/summary"), || async {
        Ok(json!("recovered"))
      })
      .await
      .unwrap();
    assert_eq!(value, json!("recovered"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_different_signatures_do_not_coalesce() {
    let clock = ManualClock::new(0);
    let coalescer = coalescer(&clock, 30_000);
    let calls = Arc::new(AtomicU32::new(0));

    let perform = |calls: Arc<AtomicU32>, value: &'static str| {
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(json!(value))
      }
    };

    let (a, b) = tokio::join!(
      coalescer.fetch(sig("/consumers/1/summary"), perform(calls.clone(), "one")),
      coalescer.fetch(sig("/consumers/2/summary"), perform(calls.clone(), "two")),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(a.unwrap(), json!("one"));
    assert_eq!(b.unwrap(), json!("two"));
  }
}
