//! Shared fakes for store and client tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::clock::ManualClock;
use crate::coalesce::RequestCoalescer;
use crate::config::StoreTuning;
use crate::store::{EntitySource, EntrySnapshot, SyncStore, TenantKey};
use crate::transport::{Envelope, Method, OutboundRequest, Transport};

/// Scripted transport. Responses queue up per "METHOD endpoint" slot and
/// are handed out in order; unscripted requests get a 404 envelope. A gate
/// holds responses back to simulate slow requests.
pub(crate) struct FakeTransport {
  inner: Mutex<FakeInner>,
}

struct FakeInner {
  responses: HashMap<String, VecDeque<Envelope>>,
  gates: HashMap<String, Arc<Semaphore>>,
  calls: Vec<String>,
}

impl FakeTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      inner: Mutex::new(FakeInner {
        responses: HashMap::new(),
        gates: HashMap::new(),
        calls: Vec::new(),
      }),
    })
  }

  fn slot(method: Method, endpoint: &str) -> String {
    format!("{} {}", method.as_str(), endpoint)
  }

  pub fn script(&self, method: Method, endpoint: &str, envelope: Envelope) {
    self
      .inner
      .lock()
      .responses
      .entry(Self::slot(method, endpoint))
      .or_default()
      .push_back(envelope);
  }

  /// Requests to this slot each wait for one permit before answering.
  pub fn gate(&self, method: Method, endpoint: &str) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    self
      .inner
      .lock()
      .gates
      .insert(Self::slot(method, endpoint), Arc::clone(&gate));
    gate
  }

  pub fn calls(&self) -> Vec<String> {
    self.inner.lock().calls.clone()
  }

  pub fn call_count(&self, method: Method, endpoint: &str) -> usize {
    let slot = Self::slot(method, endpoint);
    self.inner.lock().calls.iter().filter(|c| **c == slot).count()
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn request(&self, request: OutboundRequest) -> Envelope {
    let slot = Self::slot(request.method, &request.endpoint);
    let gate = {
      let mut inner = self.inner.lock();
      inner.calls.push(slot.clone());
      inner.gates.get(&slot).cloned()
    };
    if let Some(gate) = gate {
      if let Ok(permit) = gate.acquire().await {
        permit.forget();
      }
    }
    let scripted = self
      .inner
      .lock()
      .responses
      .get_mut(&slot)
      .and_then(VecDeque::pop_front);
    scripted.unwrap_or_else(|| Envelope::fail(Some(404), format!("no scripted response for {slot}")))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FeedItem {
  pub id: String,
  pub read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FeedStats {
  pub unread: usize,
}

/// Minimal source over a per-tenant feed endpoint.
pub(crate) struct FeedSource;

impl EntitySource for FeedSource {
  type Item = FeedItem;
  type Derived = FeedStats;

  fn request(&self, key: &TenantKey) -> OutboundRequest {
    OutboundRequest::get(format!("/feed/{key}"))
  }

  fn decode(&self, payload: Value) -> serde_json::Result<Vec<FeedItem>> {
    serde_json::from_value(payload)
  }

  fn derive(&self, items: &[FeedItem]) -> FeedStats {
    FeedStats {
      unread: items.iter().filter(|item| !item.read).count(),
    }
  }
}

/// Route tracing into the test harness; `RUST_LOG` controls verbosity.
pub(crate) fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

pub(crate) fn tenant(raw: &str) -> TenantKey {
  TenantKey::new(raw).unwrap()
}

pub(crate) fn feed_payload(items: &[(&str, bool)]) -> Envelope {
  let items: Vec<FeedItem> = items
    .iter()
    .map(|(id, read)| FeedItem {
      id: (*id).to_string(),
      read: *read,
    })
    .collect();
  Envelope::ok(json!(items))
}

pub(crate) fn test_tuning() -> StoreTuning {
  StoreTuning {
    stale_after_ms: 120_000,
    min_refresh_interval_ms: 15_000,
    background_refresh_interval_ms: None,
  }
}

pub(crate) struct StoreHarness {
  pub store: SyncStore<FeedSource>,
  pub transport: Arc<FakeTransport>,
  pub clock: ManualClock,
}

pub(crate) fn feed_store(tuning: StoreTuning) -> StoreHarness {
  init_tracing();
  let transport = FakeTransport::new();
  let clock = ManualClock::new(1_000);
  // response caching off so every fetch is observable at the transport
  let coalescer = RequestCoalescer::new(Arc::new(clock.clone())).with_ttl_ms(0);
  let transport_dyn: Arc<dyn Transport> = transport.clone();
  let store = SyncStore::new(
    FeedSource,
    transport_dyn,
    Arc::new(clock.clone()),
    coalescer,
    tuning,
  );
  StoreHarness {
    store,
    transport,
    clock,
  }
}

/// Wait until the entry for `key` has settled once (data or error).
pub(crate) async fn settled<S: EntitySource>(
  store: &SyncStore<S>,
  key: &TenantKey,
) -> EntrySnapshot<S> {
  for _ in 0..100 {
    if let Some(snapshot) = store.get_entry(key) {
      if snapshot.last_fetch_ms.is_some() || snapshot.last_error.is_some() {
        return snapshot;
      }
    }
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
  }
  panic!("entry for {key} never settled");
}

pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
  for _ in 0..200 {
    if condition() {
      return;
    }
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
  }
  panic!("timed out waiting for {what}");
}
