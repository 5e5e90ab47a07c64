//! Entry types and the source seam that feeds a store.

use serde_json::Value;

use crate::transport::{OutboundRequest, TransportError};

/// Identifier of the data owner a cache entry belongs to (consumer number,
/// user id). One key is active per store at a time; any number of keys may
/// hold cached entries simultaneously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey(String);

impl TenantKey {
  /// Build a key, rejecting blank identifiers. Activation without an
  /// identifier is a logged no-op upstream, never an error surfaced to UI.
  pub fn new(raw: impl Into<String>) -> Option<Self> {
    let raw = raw.into();
    if raw.trim().is_empty() {
      None
    } else {
      Some(Self(raw))
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for TenantKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Where a store's data comes from and what shape it takes.
///
/// One implementation per data type (notifications, consumer summary). The
/// store stays generic over the source; endpoints and payload decoding
/// live behind this trait.
pub trait EntitySource: Send + Sync + 'static {
  /// One domain record.
  type Item: Clone + Send + Sync + 'static;
  /// Aggregate recomputed from the items on every write.
  type Derived: Clone + Send + Sync + 'static;

  /// The request that fetches the items for `key`.
  ///
  /// Must scope the request to the tenant (endpoint or body): the coalescer
  /// keys purely on the request signature.
  fn request(&self, key: &TenantKey) -> OutboundRequest;

  /// Decode a successful payload into items.
  fn decode(&self, payload: Value) -> serde_json::Result<Vec<Self::Item>>;

  /// Recompute the derived aggregate. Pure function of the items.
  fn derive(&self, items: &[Self::Item]) -> Self::Derived;
}

/// Cached state for one tenant key.
///
/// `loading` and `last_error` are transient request state and only
/// meaningful while this entry's key is the active one; activation resets
/// them. `derived` is always recomputed from `items`, never written on its
/// own.
pub(crate) struct StoreEntry<S: EntitySource> {
  pub items: Vec<S::Item>,
  pub derived: S::Derived,
  pub last_fetch_ms: Option<u64>,
  pub last_attempt_ms: Option<u64>,
  pub write_generation: u64,
  pub loading: bool,
  pub last_error: Option<TransportError>,
}

impl<S: EntitySource> StoreEntry<S> {
  pub fn empty(source: &S) -> Self {
    Self {
      items: Vec::new(),
      derived: source.derive(&[]),
      last_fetch_ms: None,
      last_attempt_ms: None,
      write_generation: 0,
      loading: false,
      last_error: None,
    }
  }

  pub fn snapshot(&self) -> EntrySnapshot<S> {
    EntrySnapshot {
      items: self.items.clone(),
      derived: self.derived.clone(),
      last_fetch_ms: self.last_fetch_ms,
      loading: self.loading,
      last_error: self.last_error.clone(),
    }
  }
}

/// Owned copy of an entry handed to callers, never a lock guard.
pub struct EntrySnapshot<S: EntitySource> {
  pub items: Vec<S::Item>,
  pub derived: S::Derived,
  pub last_fetch_ms: Option<u64>,
  pub loading: bool,
  pub last_error: Option<TransportError>,
}

impl<S: EntitySource> EntrySnapshot<S> {
  /// True when there is something to show: the UI should prefer cached
  /// data plus a non-blocking error affordance over a blocking failure
  /// screen whenever this holds.
  pub fn has_data(&self) -> bool {
    self.last_fetch_ms.is_some() || !self.items.is_empty()
  }
}

impl<S: EntitySource> Clone for EntrySnapshot<S> {
  fn clone(&self) -> Self {
    Self {
      items: self.items.clone(),
      derived: self.derived.clone(),
      last_fetch_ms: self.last_fetch_ms,
      loading: self.loading,
      last_error: self.last_error.clone(),
    }
  }
}

impl<S: EntitySource> std::fmt::Debug for EntrySnapshot<S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EntrySnapshot")
      .field("items", &self.items.len())
      .field("last_fetch_ms", &self.last_fetch_ms)
      .field("loading", &self.loading)
      .field("last_error", &self.last_error)
      .finish_non_exhaustive()
  }
}
