//! Freshness and throttling decisions.
//!
//! Both are pure functions over millisecond timestamps so every call site
//! (and every test) feeds them an explicit "now" from the injected clock.
//! Staleness decides whether a background refresh is worth scheduling;
//! throttling decides whether a refresh attempt is allowed to start at all,
//! independent of staleness.

/// True when a cached entry is due for a background refresh.
///
/// A never-fetched entry (`last_fetch_ms == None`) is always stale. An entry
/// fetched exactly `stale_after_ms` ago is still fresh; staleness begins
/// strictly after the threshold.
pub fn is_stale(last_fetch_ms: Option<u64>, now_ms: u64, stale_after_ms: u64) -> bool {
  match last_fetch_ms {
    None => true,
    Some(fetched_at) => now_ms.saturating_sub(fetched_at) > stale_after_ms,
  }
}

/// True when a refresh attempt must be skipped because one started too
/// recently.
///
/// `last_attempt_ms` tracks attempted fetch starts, not successes, so a
/// burst of refresh calls collapses to one network attempt per interval.
/// A `min_interval_ms` of zero disables throttling. An attempt exactly
/// `min_interval_ms` ago no longer throttles.
pub fn should_throttle(last_attempt_ms: Option<u64>, now_ms: u64, min_interval_ms: u64) -> bool {
  match last_attempt_ms {
    None => false,
    Some(attempted_at) => now_ms.saturating_sub(attempted_at) < min_interval_ms,
  }
}
