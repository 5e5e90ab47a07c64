//! Injectable time source for the sync layer.
//!
//! Staleness, throttling, and response-cache expiry all compare monotonic
//! millisecond timestamps. The clock is a trait so tests can drive those
//! decisions with a hand-advanced clock instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond time source.
pub trait Clock: Send + Sync {
  /// Milliseconds elapsed on this clock. Monotonic, not wall time.
  fn now_ms(&self) -> u64;
}

/// Production clock backed by `Instant`, anchored at construction.
pub struct SystemClock {
  origin: Instant,
}

impl SystemClock {
  pub fn new() -> Self {
    Self {
      origin: Instant::now(),
    }
  }
}

impl Default for SystemClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for SystemClock {
  fn now_ms(&self) -> u64 {
    self.origin.elapsed().as_millis() as u64
  }
}

/// Hand-driven clock for tests.
///
/// Clones share the same underlying time, so a test can keep one handle
/// and hand another to the store under test.
#[derive(Clone, Default)]
pub struct ManualClock {
  now: Arc<AtomicU64>,
}

impl ManualClock {
  pub fn new(start_ms: u64) -> Self {
    Self {
      now: Arc::new(AtomicU64::new(start_ms)),
    }
  }

  /// Move the clock forward by `ms`.
  pub fn advance(&self, ms: u64) {
    self.now.fetch_add(ms, Ordering::SeqCst);
  }

  /// Jump the clock to an absolute value.
  pub fn set(&self, ms: u64) {
    self.now.store(ms, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_ms(&self) -> u64 {
    self.now.load(Ordering::SeqCst)
  }
}
