//! Client-side data layer for the uBill consumer apps.
//!
//! Keeps per-consumer API data cached and synchronized while the user
//! switches between accounts:
//! - Deduplicates identical concurrent requests and serves a short-TTL
//!   response cache (`coalesce`)
//! - Caches entries per tenant key with cache-first activation, staleness
//!   refresh and per-tenant throttling (`store`)
//! - Applies mutations optimistically and reconciles with the server
//!   (`store::mutate`)
//! - Normalizes every transport outcome into an explicit envelope
//!   (`transport`, `http`)
//!
//! The `billing` module wires the generic machinery to the uBill API:
//! notification feed, consumer summary, and the client facade the apps
//! embed.

pub mod billing;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod http;
pub mod identity;
pub mod policy;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use billing::BillingClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use coalesce::{CoalescerStats, RequestCoalescer, Signature};
pub use config::{Config, StoreTuning};
pub use http::HttpTransport;
pub use identity::TenantIdentity;
pub use store::{
  ActivationOutcome, EntitySource, EntrySnapshot, MutateOutcome, RefreshOutcome, SyncStore,
  TenantKey,
};
pub use transport::{Envelope, Method, OutboundRequest, Transport, TransportError};
