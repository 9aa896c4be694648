//! The `CacheBackend` trait: the shared, low-latency store behind score
//! counters, the dirty bucket and rate-limit windows.
//!
//! The primitives mirror what a networked cache such as Redis offers
//! atomically. Compound operations (increment-if-present, take-all) must be
//! atomic on the backend: concurrency safety across processes comes from
//! here, not from locks held by the caller.

use std::{future::Future, time::Duration};

/// Result of counting one hit against a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
  /// Hits in the current window, including this one.
  pub count:     i64,
  /// Time until the window resets.
  pub resets_in: Duration,
}

pub trait CacheBackend: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Integer counters ─────────────────────────────────────────────────

  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + 'a;

  /// Unconditional write. `ttl = None` keeps the value until overwritten.
  fn set<'a>(
    &'a self,
    key: &'a str,
    value: i64,
    ttl: Option<Duration>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Write only if `key` is absent. Returns whether the write happened.
  fn set_if_absent<'a>(
    &'a self,
    key: &'a str,
    value: i64,
    ttl: Option<Duration>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Atomically add `delta` to an existing counter, keeping its expiry.
  /// Returns `None` (and writes nothing) if `key` is absent.
  fn incr_existing<'a>(
    &'a self,
    key: &'a str,
    delta: i64,
  ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + 'a;

  /// Replace the value with `new` only if it currently equals `expected`.
  fn compare_and_set<'a>(
    &'a self,
    key: &'a str,
    expected: i64,
    new: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Whether [`CacheBackend::incr_existing`] is a native atomic operation.
  /// When `false`, callers emulate increments with
  /// [`CacheBackend::compare_and_set`].
  fn supports_atomic_incr(&self) -> bool { true }

  /// Whether a failed write may still have been applied, for instance when
  /// the connection dropped after the command was sent. Callers must not
  /// retry such writes.
  fn is_ambiguous(&self, _error: &Self::Error) -> bool { false }

  // ── Sets ─────────────────────────────────────────────────────────────

  /// Add `members` to the set at `key`, creating it if needed.
  fn set_insert<'a>(
    &'a self,
    key: &'a str,
    members: &'a [String],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Atomically return every member of the set at `key` and delete it.
  fn set_take<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;

  // ── Windows ──────────────────────────────────────────────────────────

  /// Count one hit in the fixed window at `key`. The window starts (and its
  /// expiry of `window` is set) on the first hit after the previous window
  /// expired.
  fn incr_window<'a>(
    &'a self,
    key: &'a str,
    window: Duration,
  ) -> impl Future<Output = Result<WindowCount, Self::Error>> + Send + 'a;
}
