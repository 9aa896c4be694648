//! Engine tunables, deserialised from the `[engine]` section of the server
//! configuration. Every field has a default.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Lifetime of a cache-resident score before it is reloaded from storage.
  pub score_ttl_secs:        u64,
  /// Upper bound on any single cache or storage call.
  pub call_timeout_ms:       u64,
  /// Extra attempts for a failed cache increment.
  pub cache_retries:         u32,
  /// Base delay between increment retries; doubles per attempt.
  pub retry_backoff_ms:      u64,
  /// Compare-and-set attempts before falling back to a plain write.
  pub cas_attempts:          u32,

  pub rate_limit_enabled:    bool,
  /// Votes an anonymous fingerprint may cast per window.
  pub anonymous_quota:       u32,
  pub rate_window_secs:      u64,

  pub sync_interval_secs:    u64,
  pub hot_interval_secs:     u64,
  /// How many of the newest threads the hot job recomputes.
  pub hot_window:            usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      score_ttl_secs:     24 * 60 * 60,
      call_timeout_ms:    2_000,
      cache_retries:      2,
      retry_backoff_ms:   25,
      cas_attempts:       8,
      rate_limit_enabled: true,
      anonymous_quota:    60,
      rate_window_secs:   60,
      sync_interval_secs: 5 * 60,
      hot_interval_secs:  15 * 60,
      hot_window:         200,
    }
  }
}

impl EngineConfig {
  pub fn score_ttl(&self) -> Duration { Duration::from_secs(self.score_ttl_secs) }

  pub fn call_timeout(&self) -> Duration { Duration::from_millis(self.call_timeout_ms) }

  pub fn retry_backoff(&self) -> Duration { Duration::from_millis(self.retry_backoff_ms) }

  pub fn rate_window(&self) -> Duration { Duration::from_secs(self.rate_window_secs) }

  pub fn sync_interval(&self) -> Duration { Duration::from_secs(self.sync_interval_secs) }

  pub fn hot_interval(&self) -> Duration { Duration::from_secs(self.hot_interval_secs) }
}
