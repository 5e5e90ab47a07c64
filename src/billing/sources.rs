//! Sources mapping each store onto its API endpoint and payload shape.

use serde_json::Value;

use super::types::{BillingOverview, ConsumerSummary, Notification, NotificationStats};
use crate::store::{EntitySource, TenantKey};
use crate::transport::OutboundRequest;

/// Per-consumer notification feed.
pub struct NotificationSource;

impl EntitySource for NotificationSource {
  type Item = Notification;
  type Derived = NotificationStats;

  fn request(&self, key: &TenantKey) -> OutboundRequest {
    OutboundRequest::get(format!("/consumers/{key}/notifications"))
  }

  fn decode(&self, payload: Value) -> serde_json::Result<Vec<Notification>> {
    serde_json::from_value(payload)
  }

  fn derive(&self, items: &[Notification]) -> NotificationStats {
    NotificationStats {
      unread: items.iter().filter(|n| !n.read).count(),
      total: items.len(),
    }
  }
}

/// Account summary for one consumer. The endpoint returns a single object;
/// it is held as a one-element entry.
pub struct SummarySource;

impl EntitySource for SummarySource {
  type Item = ConsumerSummary;
  type Derived = BillingOverview;

  fn request(&self, key: &TenantKey) -> OutboundRequest {
    OutboundRequest::get(format!("/consumers/{key}/summary"))
  }

  fn decode(&self, payload: Value) -> serde_json::Result<Vec<ConsumerSummary>> {
    match payload {
      Value::Array(_) => serde_json::from_value(payload),
      single => Ok(vec![serde_json::from_value(single)?]),
    }
  }

  fn derive(&self, items: &[ConsumerSummary]) -> BillingOverview {
    BillingOverview {
      balance_cents: items.iter().map(|s| s.balance_cents).sum(),
      meter_count: items.iter().map(|s| s.meters.len()).sum(),
    }
  }
}
