//! The Score Cache: cache-resident per-subject scores in front of durable
//! storage.
//!
//! Reads take no locks and may observe a value that is about to change.
//! Writes go through the backend's atomic primitives so concurrent voters
//! never lose each other's increments.

use std::sync::Arc;

use tally_core::{cache::CacheBackend, store::SubjectStore, subject::SubjectRef};
use tracing::{debug, warn};

use crate::{
  config::EngineConfig,
  error::{Error, Result, bounded},
  keys,
};

pub struct ScoreCache<S, C> {
  store:  Arc<S>,
  cache:  Arc<C>,
  config: Arc<EngineConfig>,
}

impl<S, C> Clone for ScoreCache<S, C> {
  fn clone(&self) -> Self {
    Self {
      store:  Arc::clone(&self.store),
      cache:  Arc::clone(&self.cache),
      config: Arc::clone(&self.config),
    }
  }
}

impl<S, C> ScoreCache<S, C>
where
  S: SubjectStore,
  C: CacheBackend,
{
  pub fn new(store: Arc<S>, cache: Arc<C>, config: Arc<EngineConfig>) -> Self {
    Self { store, cache, config }
  }

  /// Current score, loading it from durable storage on a miss.
  pub async fn get(&self, subject: SubjectRef) -> Result<i64> {
    let key = keys::score(subject);
    if let Some(score) = self.cache_get(&key).await? {
      return Ok(score);
    }
    self.populate(subject, &key).await
  }

  /// Current cache-resident score without populating on a miss.
  pub async fn peek(&self, subject: SubjectRef) -> Result<Option<i64>> {
    self.cache_get(&keys::score(subject)).await
  }

  /// Overwrite the cached score.
  pub async fn set(&self, subject: SubjectRef, value: i64) -> Result<()> {
    let key = keys::score(subject);
    bounded(
      self.config.call_timeout(),
      "cache set",
      |e| self.write_error(e),
      self.cache.set(&key, value, Some(self.config.score_ttl())),
    )
    .await
  }

  /// Add `delta` and return the new score.
  ///
  /// Outright cache failures are retried with doubling backoff. A write that
  /// timed out or lost its reply may already have been applied, so it fails
  /// with [`Error::Timeout`] or [`Error::CacheAmbiguous`] instead.
  pub async fn add(&self, subject: SubjectRef, delta: i64) -> Result<i64> {
    let key = keys::score(subject);
    let mut attempt = 0;
    loop {
      let outcome = if self.cache.supports_atomic_incr() {
        self.add_atomic(subject, &key, delta).await
      } else {
        self.add_cas(subject, &key, delta).await
      };

      match outcome {
        Err(Error::Cache(e)) if attempt < self.config.cache_retries => {
          let backoff = self.config.retry_backoff() * 2u32.saturating_pow(attempt);
          warn!(%subject, attempt, error = %e, ?backoff, "retrying score increment");
          tokio::time::sleep(backoff).await;
          attempt += 1;
        }
        other => return other,
      }
    }
  }

  async fn add_atomic(&self, subject: SubjectRef, key: &str, delta: i64) -> Result<i64> {
    if let Some(score) = self.incr_existing(key, delta).await? {
      return Ok(score);
    }

    // Miss: seed from storage without clobbering a concurrent seeder, then
    // increment whatever value won.
    let durable = self.load_durable(subject).await?;
    self.cache_set_if_absent(key, durable).await?;
    match self.incr_existing(key, delta).await? {
      Some(score) => Ok(score),
      None => {
        // Evicted between seeding and incrementing.
        let score = durable.saturating_add(delta);
        self.set(subject, score).await?;
        Ok(score)
      }
    }
  }

  async fn add_cas(&self, subject: SubjectRef, key: &str, delta: i64) -> Result<i64> {
    for _ in 0..self.config.cas_attempts {
      let current = self.get(subject).await?;
      let next = current.saturating_add(delta);
      let swapped = bounded(
        self.config.call_timeout(),
        "cache compare-and-set",
        |e| self.write_error(e),
        self.cache.compare_and_set(key, current, next),
      )
      .await?;
      if swapped {
        return Ok(next);
      }
    }

    // Contention outlasted the CAS budget: apply the delta to the latest
    // value rather than drop it.
    let latest = self.get(subject).await?;
    let score = latest.saturating_add(delta);
    warn!(%subject, delta, score, "compare-and-set exhausted; writing score directly");
    self.set(subject, score).await?;
    Ok(score)
  }

  async fn populate(&self, subject: SubjectRef, key: &str) -> Result<i64> {
    let durable = self.load_durable(subject).await?;
    if self.cache_set_if_absent(key, durable).await? {
      debug!(%subject, score = durable, "score cache populated from storage");
      return Ok(durable);
    }
    // Someone else populated (and maybe incremented) first.
    Ok(self.cache_get(key).await?.unwrap_or(durable))
  }

  async fn load_durable(&self, subject: SubjectRef) -> Result<i64> {
    bounded(
      self.config.call_timeout(),
      "read score",
      Error::storage,
      self.store.read_score(subject),
    )
    .await?
    .ok_or(Error::NotFound(subject))
  }

  async fn cache_get(&self, key: &str) -> Result<Option<i64>> {
    bounded(self.config.call_timeout(), "cache get", Error::cache, self.cache.get(key)).await
  }

  async fn cache_set_if_absent(&self, key: &str, value: i64) -> Result<bool> {
    bounded(
      self.config.call_timeout(),
      "cache set-if-absent",
      Error::cache,
      self.cache.set_if_absent(key, value, Some(self.config.score_ttl())),
    )
    .await
  }

  async fn incr_existing(&self, key: &str, delta: i64) -> Result<Option<i64>> {
    bounded(
      self.config.call_timeout(),
      "cache increment",
      |e| self.write_error(e),
      self.cache.incr_existing(key, delta),
    )
    .await
  }

  fn write_error(&self, e: C::Error) -> Error {
    if self.cache.is_ambiguous(&e) {
      Error::CacheAmbiguous(Box::new(e))
    } else {
      Error::cache(e)
    }
  }
}
