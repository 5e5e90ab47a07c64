//! uBill domain layer: the notification feed and consumer summary stores.

mod client;
mod sources;
mod types;

pub use client::BillingClient;
pub use sources::{NotificationSource, SummarySource};
pub use types::{
  BillingOverview, ConsumerSummary, Meter, MeterKind, Notification, NotificationCategory,
  NotificationStats,
};
