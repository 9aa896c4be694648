//! Error type for `tally-engine`.

use std::{future::Future, time::Duration};

use tally_core::subject::SubjectRef;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// The subject does not exist, is deleted, or has another kind.
  #[error("subject not found: {0}")]
  NotFound(SubjectRef),

  /// The anonymous voter exhausted its quota for the current window.
  #[error("rate limited; window resets in {}s", .retry_after.as_secs())]
  RateLimited { retry_after: Duration },

  #[error("store error: {0}")]
  Storage(#[source] BoxError),

  #[error("cache error: {0}")]
  Cache(#[source] BoxError),

  /// A cache write failed in a way that leaves its effect unknown.
  #[error("cache write may or may not have applied: {0}")]
  CacheAmbiguous(#[source] BoxError),

  #[error("{0} timed out")]
  Timeout(&'static str),
}

impl Error {
  pub fn storage<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Storage(Box::new(e))
  }

  pub fn cache<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Cache(Box::new(e))
  }

  /// Whether retrying the same request later may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Self::Storage(_) | Self::Cache(_) | Self::CacheAmbiguous(_) | Self::Timeout(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Await a backend call under `limit`, mapping its error with `wrap`.
pub(crate) async fn bounded<T, E, F, W>(
  limit: Duration,
  op:    &'static str,
  wrap:  W,
  fut:   F,
) -> Result<T>
where
  F: Future<Output = Result<T, E>>,
  W: FnOnce(E) -> Error,
{
  match tokio::time::timeout(limit, fut).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(e)) => Err(wrap(e)),
    Err(_) => Err(Error::Timeout(op)),
  }
}
