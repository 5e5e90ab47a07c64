//! Optimistic mutations: apply locally, then confirm with the server.

use std::future::Future;

use tracing::{debug, trace, warn};

use super::entry::StoreEntry;
use super::{EntitySource, SyncStore, TenantKey};
use crate::transport::{Envelope, TransportError};

/// What `mutate` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutateOutcome {
  /// Local change applied and confirmed by the server.
  Confirmed,
  /// Local change applied; the server call failed. The optimistic state is
  /// retained (no rollback) and the error recorded for the active tenant.
  /// The next successful refresh reconciles with server truth.
  RemoteFailed(TransportError),
}

impl<S: EntitySource> SyncStore<S> {
  /// Apply `local_update` to the entry for `key`, recompute the derived
  /// aggregate, then run `remote` to confirm.
  ///
  /// The local phase happens synchronously before the remote call starts,
  /// so the UI reflects the change immediately and concurrent mutations
  /// land in call order. A missing entry is created empty first. Remote
  /// failure never rolls the local change back.
  pub async fn mutate<F, R, Fut>(&self, key: &TenantKey, local_update: F, remote: R) -> MutateOutcome
  where
    F: FnOnce(&mut Vec<S::Item>),
    R: FnOnce() -> Fut,
    Fut: Future<Output = Envelope>,
  {
    {
      let mut state = self.inner.state.lock();
      let entry = state
        .entries
        .entry(key.clone())
        .or_insert_with(|| StoreEntry::empty(&self.inner.source));
      local_update(&mut entry.items);
      entry.derived = self.inner.source.derive(&entry.items);
      trace!(tenant = %key, "optimistic update applied");
    }

    match remote().await.into_result() {
      Ok(_) => {
        trace!(tenant = %key, "mutation confirmed");
        MutateOutcome::Confirmed
      }
      Err(err) => {
        let mut state = self.inner.state.lock();
        if state.active.as_ref() == Some(key) {
          if let Some(entry) = state.entries.get_mut(key) {
            entry.last_error = Some(err.clone());
          }
          warn!(tenant = %key, error = %err, "mutation failed; optimistic state retained");
        } else {
          debug!(tenant = %key, error = %err, "mutation for inactive tenant failed");
        }
        MutateOutcome::RemoteFailed(err)
      }
    }
  }
}
