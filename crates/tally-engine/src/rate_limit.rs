//! Fixed-window vote quota for anonymous voters.
//!
//! Windows live in the shared cache so every process counts against the same
//! quota. Authenticated users are not limited here.
//!
//! The window starts at a fingerprint's first vote and resets when it
//! expires; it does not roll. A voter who spends the quota just before a
//! reset can spend it again right after, so up to twice the quota may land
//! within one window length.

use std::{sync::Arc, time::Duration};

use tally_core::{cache::CacheBackend, vote::VoterIdentity};
use tracing::debug;

use crate::{
  config::EngineConfig,
  error::{Error, Result, bounded},
  keys,
};

pub struct RateLimiter<C> {
  cache:   Arc<C>,
  enabled: bool,
  quota:   u32,
  window:  Duration,
  timeout: Duration,
}

impl<C: CacheBackend> RateLimiter<C> {
  pub fn new(cache: Arc<C>, config: &EngineConfig) -> Self {
    Self {
      cache,
      enabled: config.rate_limit_enabled,
      quota: config.anonymous_quota,
      window: config.rate_window(),
      timeout: config.call_timeout(),
    }
  }

  /// Count one vote attempt by `voter`, failing with
  /// [`Error::RateLimited`] once the window's quota is spent.
  pub async fn check(&self, voter: &VoterIdentity) -> Result<()> {
    let VoterIdentity::Anonymous(fingerprint) = voter else {
      return Ok(());
    };
    if !self.enabled {
      return Ok(());
    }

    let key = keys::rate_window(fingerprint);
    let hit = bounded(
      self.timeout,
      "rate-limit window",
      Error::cache,
      self.cache.incr_window(&key, self.window),
    )
    .await?;

    if hit.count > i64::from(self.quota) {
      debug!(%fingerprint, count = hit.count, resets_in = ?hit.resets_in, "anonymous voter rate limited");
      return Err(Error::RateLimited { retry_after: hit.resets_in });
    }
    Ok(())
  }
}
