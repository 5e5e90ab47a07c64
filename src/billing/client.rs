//! Facade wiring both stores over one transport and coalescer.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use super::sources::{NotificationSource, SummarySource};
use crate::clock::{Clock, SystemClock};
use crate::coalesce::{CoalescerStats, RequestCoalescer};
use crate::config::Config;
use crate::identity::TenantIdentity;
use crate::store::{MutateOutcome, RefreshOutcome, SyncStore, TenantKey};
use crate::transport::{OutboundRequest, Transport};

/// Entry point for the consumer apps: the notification feed and the
/// consumer summary, cached per tenant over one shared transport.
pub struct BillingClient {
  transport: Arc<dyn Transport>,
  coalescer: RequestCoalescer,
  notifications: SyncStore<NotificationSource>,
  summary: SyncStore<SummarySource>,
}

impl BillingClient {
  pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
    Self::with_clock(config, transport, Arc::new(SystemClock::default()))
  }

  /// Like [`BillingClient::new`] with an injected clock, for tests and
  /// simulations.
  pub fn with_clock(
    config: &Config,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let coalescer =
      RequestCoalescer::new(Arc::clone(&clock)).with_ttl_ms(config.api.response_ttl_ms);

    let notifications = SyncStore::new(
      NotificationSource,
      Arc::clone(&transport),
      Arc::clone(&clock),
      coalescer.clone(),
      config.stores.notifications,
    );
    let summary = SyncStore::new(
      SummarySource,
      Arc::clone(&transport),
      Arc::clone(&clock),
      coalescer.clone(),
      config.stores.consumer_summary,
    );

    Self {
      transport,
      coalescer,
      notifications,
      summary,
    }
  }

  pub fn notifications(&self) -> &SyncStore<NotificationSource> {
    &self.notifications
  }

  pub fn summary(&self) -> &SyncStore<SummarySource> {
    &self.summary
  }

  /// Make `key` the active consumer in every store, e.g. on sign-in or
  /// account switch.
  pub fn activate(&self, key: TenantKey) {
    debug!(consumer = %key, "activating consumer");
    self.notifications.activate(key.clone());
    self.summary.activate(key);
  }

  /// Resolve the signed-in consumer and activate it everywhere. Returns
  /// the key that was activated, if any.
  pub async fn activate_from(&self, identity: &dyn TenantIdentity) -> Option<TenantKey> {
    match identity.active_tenant().await {
      Some(key) => {
        self.activate(key.clone());
        Some(key)
      }
      None => {
        warn!("no signed-in consumer; billing data left idle");
        None
      }
    }
  }

  /// Refresh both stores for the active consumer.
  pub async fn refresh_all(&self, force: bool) -> (RefreshOutcome, RefreshOutcome) {
    tokio::join!(self.notifications.refresh(force), self.summary.refresh(force))
  }

  /// Drop cached data for `key` in every store (sign-out).
  pub fn clear(&self, key: &TenantKey) {
    self.notifications.clear(key);
    self.summary.clear(key);
  }

  /// Stop background refreshes and abandon in-flight fetches.
  pub fn close(&self) {
    self.notifications.close();
    self.summary.close();
  }

  /// Effectiveness counters of the shared coalescer.
  pub fn request_stats(&self) -> CoalescerStats {
    self.coalescer.stats()
  }

  /// Mark one notification read: applied to the feed immediately,
  /// confirmed with the server behind it.
  pub async fn mark_notification_read(
    &self,
    key: &TenantKey,
    notification_id: &str,
  ) -> MutateOutcome {
    let endpoint = format!("/consumers/{key}/notifications/{notification_id}/read");
    let transport = Arc::clone(&self.transport);
    let id = notification_id.to_string();
    self
      .notifications
      .mutate(
        key,
        move |items| {
          if let Some(item) = items.iter_mut().find(|n| n.id == id) {
            item.read = true;
          }
        },
        move || async move {
          transport
            .request(OutboundRequest::post(endpoint, json!({})))
            .await
        },
      )
      .await
  }

  /// Mark the whole feed read.
  pub async fn mark_all_notifications_read(&self, key: &TenantKey) -> MutateOutcome {
    let endpoint = format!("/consumers/{key}/notifications/read-all");
    let transport = Arc::clone(&self.transport);
    self
      .notifications
      .mutate(
        key,
        |items| {
          for item in items.iter_mut() {
            item.read = true;
          }
        },
        move || async move {
          transport
            .request(OutboundRequest::post(endpoint, json!({})))
            .await
        },
      )
      .await
  }
}
