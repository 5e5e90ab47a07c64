//! Multi-tenant entity store: cache-first reads, deduplicated refreshes,
//! and a hard gate between tenants.
//!
//! One [`SyncStore`] holds one kind of data (notifications, consumer
//! summary) for any number of tenant keys. Exactly one key is active at a
//! time; switching keys serves whatever is cached synchronously and
//! refreshes stale data behind the view. Fetch results always land under
//! the key they were issued for, so switching away and back never loses a
//! warm cache and never shows one tenant's transient state to another.

mod entry;
mod mutate;

pub use entry::{EntitySource, EntrySnapshot, TenantKey};
pub use mutate::MutateOutcome;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::coalesce::{RequestCoalescer, Signature};
use crate::config::StoreTuning;
use crate::identity::TenantIdentity;
use crate::policy;
use crate::transport::{Transport, TransportError};

use entry::StoreEntry;

/// What `activate` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
  /// No tenant key was available; the store stays as it was.
  NoTenant,
  /// The key was already active.
  Unchanged,
  /// Cached items were exposed synchronously. `refreshing` tells whether a
  /// staleness refresh was scheduled behind them.
  Cached { refreshing: bool },
  /// Nothing was cached for the key; an empty loading entry was exposed
  /// and the initial fetch issued.
  Fetching,
}

/// What `refresh` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
  /// No active tenant to refresh.
  NoActiveTenant,
  /// Skipped: an attempt ran more recently than the configured minimum
  /// interval.
  Throttled,
  /// The store shut down while the request was in flight.
  Cancelled,
  /// Fetched and decoded; the entry was updated.
  Completed,
  /// The request or decode failed; recorded on the entry if its tenant is
  /// still the active one.
  Failed(TransportError),
}

/// Why a fetch is being issued. Decides whether the per-tenant throttle
/// applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchTrigger {
  /// Initial load for a key that has never completed a fetch.
  Activation,
  /// Staleness refresh behind a cached activation.
  StaleOnActivate,
  /// `refresh(false)`.
  Manual,
  /// `refresh(true)`, e.g. pull-to-refresh.
  Forced,
  /// Periodic refresh of the active tenant.
  Background,
}

impl FetchTrigger {
  fn respects_throttle(self) -> bool {
    matches!(self, Self::StaleOnActivate | Self::Manual | Self::Background)
  }
}

struct StoreState<S: EntitySource> {
  active: Option<TenantKey>,
  entries: HashMap<TenantKey, StoreEntry<S>>,
  next_generation: u64,
  background: Option<CancellationToken>,
}

pub(crate) struct StoreInner<S: EntitySource> {
  source: S,
  transport: Arc<dyn Transport>,
  clock: Arc<dyn Clock>,
  coalescer: RequestCoalescer,
  tuning: StoreTuning,
  state: Mutex<StoreState<S>>,
  /// Cancelled when the store is closed or dropped; parent of every
  /// background loop token.
  lifetime: CancellationToken,
}

impl<S: EntitySource> Drop for StoreInner<S> {
  fn drop(&mut self) {
    self.lifetime.cancel();
  }
}

/// Cache-first store for one kind of tenant-scoped data.
///
/// Cheap to clone; clones share state. Reads are synchronous snapshots,
/// network work happens on spawned tasks behind them.
pub struct SyncStore<S: EntitySource> {
  pub(crate) inner: Arc<StoreInner<S>>,
}

impl<S: EntitySource> Clone for SyncStore<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<S: EntitySource> SyncStore<S> {
  /// Build a store around its collaborators. The coalescer is typically
  /// shared across every store talking to the same backend.
  pub fn new(
    source: S,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    coalescer: RequestCoalescer,
    tuning: StoreTuning,
  ) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        source,
        transport,
        clock,
        coalescer,
        tuning,
        state: Mutex::new(StoreState {
          active: None,
          entries: HashMap::new(),
          next_generation: 1,
          background: None,
        }),
        lifetime: CancellationToken::new(),
      }),
    }
  }

  /// Make `key` the active tenant.
  ///
  /// Anything cached for the key is exposed synchronously; returning to a
  /// previously viewed tenant must not flicker through a loading state.
  /// Stale or missing data is fetched without blocking the caller, and the
  /// result lands under `key` even if the user has switched away by then.
  pub fn activate(&self, key: TenantKey) -> ActivationOutcome {
    let inner = &self.inner;
    let mut state = inner.state.lock();

    if state.active.as_ref() == Some(&key) {
      trace!(tenant = %key, "tenant already active");
      return ActivationOutcome::Unchanged;
    }

    debug!(tenant = %key, previous = ?state.active, "activating tenant");
    state.active = Some(key.clone());
    inner.restart_background(&mut state, &key, Arc::downgrade(inner));

    let now = inner.clock.now_ms();
    let (outcome, issued) = match state.entries.get_mut(&key) {
      Some(entry) if entry.last_fetch_ms.is_some() => {
        // Transient flags belong to the previous activation of this key.
        entry.loading = false;
        entry.last_error = None;
        let stale = policy::is_stale(entry.last_fetch_ms, now, inner.tuning.stale_after_ms);
        if stale {
          let issued = inner.begin_fetch(&mut state, &key, FetchTrigger::StaleOnActivate);
          (
            ActivationOutcome::Cached {
              refreshing: issued.is_some(),
            },
            issued,
          )
        } else {
          (ActivationOutcome::Cached { refreshing: false }, None)
        }
      }
      // Never fetched: nothing to show yet, so the initial load goes out
      // now, throttle notwithstanding. A previous attempt still in flight
      // is joined in the coalescer rather than duplicated.
      _ => {
        let issued = inner.begin_fetch(&mut state, &key, FetchTrigger::Activation);
        (ActivationOutcome::Fetching, issued)
      }
    };
    drop(state);

    if let Some(generation) = issued {
      let task_inner = Arc::clone(inner);
      tokio::spawn(async move {
        task_inner.run_fetch(key, generation).await;
      });
    }
    outcome
  }

  /// Activate whatever tenant the session layer reports, or stay idle.
  pub async fn activate_from(&self, identity: &dyn TenantIdentity) -> ActivationOutcome {
    match identity.active_tenant().await {
      Some(key) => self.activate(key),
      None => {
        warn!("no active tenant available; store left idle");
        ActivationOutcome::NoTenant
      }
    }
  }

  /// Refetch the active tenant's data and wait for it to settle.
  ///
  /// `force` skips the refresh throttle (still recording the attempt) for
  /// explicit user gestures like pull-to-refresh. Overlapping calls for
  /// the same data collapse onto one network request.
  pub async fn refresh(&self, force: bool) -> RefreshOutcome {
    let inner = &self.inner;
    let issued = {
      let mut state = inner.state.lock();
      let Some(key) = state.active.clone() else {
        debug!("refresh requested with no active tenant");
        return RefreshOutcome::NoActiveTenant;
      };
      let trigger = if force {
        FetchTrigger::Forced
      } else {
        FetchTrigger::Manual
      };
      inner
        .begin_fetch(&mut state, &key, trigger)
        .map(|generation| (key, generation))
    };

    match issued {
      Some((key, generation)) => inner.run_fetch(key, generation).await,
      None => RefreshOutcome::Throttled,
    }
  }

  /// Snapshot of the entry for `key`, if one is cached.
  pub fn get_entry(&self, key: &TenantKey) -> Option<EntrySnapshot<S>> {
    self
      .inner
      .state
      .lock()
      .entries
      .get(key)
      .map(StoreEntry::snapshot)
  }

  /// Snapshot of the active tenant's entry. `None` while nothing is
  /// cached for it, including right after `clear`.
  pub fn active_entry(&self) -> Option<EntrySnapshot<S>> {
    let state = self.inner.state.lock();
    let key = state.active.as_ref()?;
    state.entries.get(key).map(StoreEntry::snapshot)
  }

  pub fn active_tenant(&self) -> Option<TenantKey> {
    self.inner.state.lock().active.clone()
  }

  /// Drop cached data for `key`, e.g. on sign-out. The active key is
  /// unchanged; if `key` is active the store now shows an empty,
  /// non-loading view until the next refresh or activation.
  pub fn clear(&self, key: &TenantKey) {
    let mut state = self.inner.state.lock();
    if state.entries.remove(key).is_some() {
      debug!(tenant = %key, "cleared cached entry");
    }
  }

  /// Drop every cached entry, keeping the active key.
  pub fn clear_all(&self) {
    let mut state = self.inner.state.lock();
    let count = state.entries.len();
    state.entries.clear();
    debug!(count, "cleared all cached entries");
  }

  /// Stop background work and abandon in-flight fetches. Reads keep
  /// serving whatever is already cached.
  pub fn close(&self) {
    debug!("closing store");
    self.inner.lifetime.cancel();
  }
}

impl<S: EntitySource> StoreInner<S> {
  /// Record a fetch attempt for `key` and hand back its generation, or
  /// `None` when the per-tenant throttle suppresses it.
  fn begin_fetch(
    &self,
    state: &mut StoreState<S>,
    key: &TenantKey,
    trigger: FetchTrigger,
  ) -> Option<u64> {
    let now = self.clock.now_ms();
    let entry = state
      .entries
      .entry(key.clone())
      .or_insert_with(|| StoreEntry::empty(&self.source));

    if trigger.respects_throttle()
      && policy::should_throttle(entry.last_attempt_ms, now, self.tuning.min_refresh_interval_ms)
    {
      trace!(tenant = %key, ?trigger, "fetch suppressed by refresh throttle");
      return None;
    }

    entry.last_attempt_ms = Some(now);
    // Only the initial load shows a spinner; refreshes behind cached data
    // must not flicker.
    if entry.last_fetch_ms.is_none() {
      entry.loading = true;
      entry.last_error = None;
    }

    let generation = state.next_generation;
    state.next_generation += 1;
    trace!(tenant = %key, generation, ?trigger, "fetch issued");
    Some(generation)
  }

  /// Execute one fetch end to end: transport (through the coalescer),
  /// decode, settle. Never panics; failures land in `last_error`.
  async fn run_fetch(&self, key: TenantKey, generation: u64) -> RefreshOutcome {
    let request = self.source.request(&key);
    let signature = Signature::of(&request);
    let transport = Arc::clone(&self.transport);

    let fetched = tokio::select! {
      biased;
      _ = self.lifetime.cancelled() => {
        debug!(tenant = %key, "store closed; abandoning fetch");
        return RefreshOutcome::Cancelled;
      }
      result = self.coalescer.fetch(signature, move || async move {
        transport.request(request).await.into_result()
      }) => result,
    };

    let decoded = fetched.and_then(|payload| {
      self.source.decode(payload).map_err(|e| TransportError {
        status: None,
        message: format!("failed to decode payload: {e}"),
      })
    });

    self.settle_fetch(&key, generation, decoded)
  }

  /// Write a fetch result into the entry it was issued for.
  ///
  /// Items always land under the issuing key so inactive tenants still get
  /// warmed, but `loading`/`last_error` only change while that key is the
  /// active one. Results older than the entry's last write are discarded.
  fn settle_fetch(
    &self,
    key: &TenantKey,
    generation: u64,
    result: Result<Vec<S::Item>, TransportError>,
  ) -> RefreshOutcome {
    let now = self.clock.now_ms();
    let mut state = self.state.lock();
    let is_active = state.active.as_ref() == Some(key);

    match result {
      Ok(items) => {
        let entry = state
          .entries
          .entry(key.clone())
          .or_insert_with(|| StoreEntry::empty(&self.source));
        if generation < entry.write_generation {
          debug!(
            tenant = %key,
            generation,
            current = entry.write_generation,
            "discarding superseded fetch result"
          );
          return RefreshOutcome::Completed;
        }
        trace!(tenant = %key, generation, count = items.len(), is_active, "fetch settled");
        entry.derived = self.source.derive(&items);
        entry.items = items;
        entry.last_fetch_ms = Some(now);
        entry.write_generation = generation;
        if is_active {
          entry.loading = false;
          entry.last_error = None;
        }
        RefreshOutcome::Completed
      }
      Err(err) => {
        if is_active {
          if let Some(entry) = state.entries.get_mut(key) {
            entry.loading = false;
            entry.last_error = Some(err.clone());
          }
          warn!(tenant = %key, error = %err, "fetch for active tenant failed");
        } else {
          debug!(tenant = %key, error = %err, "fetch for inactive tenant failed");
        }
        RefreshOutcome::Failed(err)
      }
    }
  }

  /// Start the periodic refresh loop for a newly activated key, stopping
  /// the previous one.
  fn restart_background(&self, state: &mut StoreState<S>, key: &TenantKey, weak: Weak<Self>) {
    if let Some(token) = state.background.take() {
      token.cancel();
    }
    let Some(interval_ms) = self.tuning.background_refresh_interval_ms else {
      return;
    };

    let token = self.lifetime.child_token();
    state.background = Some(token.clone());
    let key = key.clone();
    tokio::spawn(async move {
      let interval = Duration::from_millis(interval_ms);
      loop {
        tokio::select! {
          biased;
          _ = token.cancelled() => break,
          _ = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = weak.upgrade() else { break };
        inner.background_pass(&key).await;
      }
      trace!(tenant = %key, "background refresh loop stopped");
    });
  }

  /// One tick of the background loop: refresh the key if it is still the
  /// active one, respecting the throttle.
  async fn background_pass(&self, key: &TenantKey) {
    let issued = {
      let mut state = self.state.lock();
      if state.active.as_ref() != Some(key) {
        return;
      }
      self.begin_fetch(&mut state, key, FetchTrigger::Background)
    };
    if let Some(generation) = issued {
      let _ = self.run_fetch(key.clone(), generation).await;
    }
  }
}
