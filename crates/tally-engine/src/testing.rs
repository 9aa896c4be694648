//! A [`MemoryCache`] wrapper whose primitives can be made to yield, fail or
//! lose races on demand.

use std::{
  sync::{
    Mutex,
    atomic::{AtomicU32, AtomicUsize, Ordering},
  },
  time::Duration,
};

use tally_core::cache::{CacheBackend, WindowCount};
use thiserror::Error;

use crate::memory::{MemoryCache, MemoryCacheError};

#[derive(Debug, Clone, Copy)]
pub enum Failure {
  /// The increment is applied but its reply never arrives.
  ReplyLost,
  /// The increment never reaches the cache.
  Refused,
}

#[derive(Debug, Error)]
pub enum ScriptedError {
  #[error("reply lost")]
  ReplyLost,
  #[error("connection refused")]
  Refused,
  #[error(transparent)]
  Inner(#[from] MemoryCacheError),
}

pub struct ScriptedCache {
  inner:        MemoryCache,
  yields:       bool,
  incr_failure: Mutex<Option<Failure>>,
  steal_swaps:  AtomicU32,
  lost_swaps:   AtomicUsize,
}

impl ScriptedCache {
  pub fn new(inner: MemoryCache) -> Self {
    Self {
      inner,
      yields: false,
      incr_failure: Mutex::new(None),
      steal_swaps: AtomicU32::new(0),
      lost_swaps: AtomicUsize::new(0),
    }
  }

  /// Yield to the scheduler before every primitive.
  pub fn yielding(inner: MemoryCache) -> Self { Self { yields: true, ..Self::new(inner) } }

  pub fn fail_next_incr(&self, failure: Failure) {
    *self.incr_failure.lock().unwrap() = Some(failure);
  }

  /// Make the next `n` compare-and-sets lose to a concurrent `+1`.
  pub fn steal_swaps(&self, n: u32) { self.steal_swaps.store(n, Ordering::SeqCst); }

  /// Compare-and-sets that did not swap.
  pub fn lost_swaps(&self) -> usize { self.lost_swaps.load(Ordering::SeqCst) }

  async fn pause(&self) {
    if self.yields {
      tokio::task::yield_now().await;
    }
  }
}

type Result<T, E = ScriptedError> = std::result::Result<T, E>;

impl CacheBackend for ScriptedCache {
  type Error = ScriptedError;

  async fn get<'a>(&'a self, key: &'a str) -> Result<Option<i64>> {
    self.pause().await;
    Ok(self.inner.get(key).await?)
  }

  async fn set<'a>(&'a self, key: &'a str, value: i64, ttl: Option<Duration>) -> Result<()> {
    self.pause().await;
    Ok(self.inner.set(key, value, ttl).await?)
  }

  async fn set_if_absent<'a>(
    &'a self,
    key:   &'a str,
    value: i64,
    ttl:   Option<Duration>,
  ) -> Result<bool> {
    self.pause().await;
    Ok(self.inner.set_if_absent(key, value, ttl).await?)
  }

  async fn incr_existing<'a>(&'a self, key: &'a str, delta: i64) -> Result<Option<i64>> {
    self.pause().await;
    let failure = self.incr_failure.lock().unwrap().take();
    match failure {
      Some(Failure::Refused) => Err(ScriptedError::Refused),
      Some(Failure::ReplyLost) => {
        self.inner.incr_existing(key, delta).await?;
        Err(ScriptedError::ReplyLost)
      }
      None => Ok(self.inner.incr_existing(key, delta).await?),
    }
  }

  async fn compare_and_set<'a>(&'a self, key: &'a str, expected: i64, new: i64) -> Result<bool> {
    self.pause().await;
    let stolen = self
      .steal_swaps
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if stolen {
      let current = self.inner.get(key).await?.unwrap_or_default();
      self.inner.set(key, current + 1, None).await?;
    }
    let swapped = self.inner.compare_and_set(key, expected, new).await?;
    if !swapped {
      self.lost_swaps.fetch_add(1, Ordering::SeqCst);
    }
    Ok(swapped)
  }

  fn supports_atomic_incr(&self) -> bool { self.inner.supports_atomic_incr() }

  fn is_ambiguous(&self, error: &ScriptedError) -> bool {
    matches!(error, ScriptedError::ReplyLost)
  }

  async fn set_insert<'a>(&'a self, key: &'a str, members: &'a [String]) -> Result<()> {
    self.pause().await;
    Ok(self.inner.set_insert(key, members).await?)
  }

  async fn set_take<'a>(&'a self, key: &'a str) -> Result<Vec<String>> {
    self.pause().await;
    Ok(self.inner.set_take(key).await?)
  }

  async fn incr_window<'a>(&'a self, key: &'a str, window: Duration) -> Result<WindowCount> {
    self.pause().await;
    Ok(self.inner.incr_window(key, window).await?)
  }
}
