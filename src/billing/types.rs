use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a consumer's notification feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub category: NotificationCategory,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub read: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
  Billing,
  Payment,
  Outage,
  #[default]
  #[serde(other)]
  General,
}

/// Aggregate over the feed, recomputed on every write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationStats {
  pub unread: usize,
  pub total: usize,
}

/// Account details for one consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSummary {
  pub uid: String,
  pub name: String,
  #[serde(default)]
  pub address: Option<String>,
  /// Outstanding balance; negative means credit
  pub balance_cents: i64,
  #[serde(default)]
  pub due_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub meters: Vec<Meter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meter {
  pub serial: String,
  #[serde(default)]
  pub kind: MeterKind,
  #[serde(default)]
  pub last_reading: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterKind {
  #[default]
  Electricity,
  Water,
  Gas,
}

/// Aggregate over the summary entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BillingOverview {
  pub balance_cents: i64,
  pub meter_count: usize,
}
