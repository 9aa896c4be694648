//! The Reconciliation Job: flush dirty cache-resident scores to durable
//! storage.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tally_core::{cache::CacheBackend, store::SubjectStore, subject::SubjectRef};
use tracing::{debug, info, warn};

use crate::{
  config::EngineConfig,
  dirty::DirtySet,
  error::{Error, Result, bounded},
  scheduler::PeriodicJob,
  score_cache::ScoreCache,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
  pub flushed: usize,
  /// Drained subjects with no cached score left to flush.
  pub skipped: usize,
  pub failed:  usize,
}

pub struct Reconciler<S, C> {
  store:  Arc<S>,
  scores: ScoreCache<S, C>,
  dirty:  DirtySet<C>,
  config: Arc<EngineConfig>,
}

impl<S, C> Reconciler<S, C>
where
  S: SubjectStore,
  C: CacheBackend,
{
  pub fn new(store: Arc<S>, cache: Arc<C>, config: Arc<EngineConfig>) -> Self {
    Self {
      scores: ScoreCache::new(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&config)),
      dirty: DirtySet::new(cache, config.call_timeout()),
      store,
      config,
    }
  }

  /// Drain the dirty set and persist each drained subject's cached score.
  pub async fn run(&self) -> Result<ReconcileReport> {
    let drained = self.dirty.drain_all().await?;
    let mut report = ReconcileReport::default();
    if drained.is_empty() {
      debug!("no dirty scores to sync");
      return Ok(report);
    }

    let mut retry = Vec::new();
    for subject in drained.subjects() {
      match self.flush(subject).await {
        Ok(true) => report.flushed += 1,
        Ok(false) => report.skipped += 1,
        Err(e) => {
          warn!(%subject, error = %e, "failed to sync score");
          report.failed += 1;
          retry.push(subject);
        }
      }
    }

    if let Err(e) = self.dirty.mark_many(&retry).await {
      warn!(count = retry.len(), error = %e, "failed to re-mark unsynced scores");
    }

    info!(
      flushed = report.flushed,
      skipped = report.skipped,
      failed = report.failed,
      "synced scores"
    );
    Ok(report)
  }

  async fn flush(&self, subject: SubjectRef) -> Result<bool> {
    let Some(score) = self.scores.peek(subject).await? else {
      return Ok(false);
    };
    bounded(
      self.config.call_timeout(),
      "write score",
      Error::storage,
      self.store.write_score(subject, score),
    )
    .await?;
    Ok(true)
  }
}

impl<S, C> PeriodicJob for Reconciler<S, C>
where
  S: SubjectStore + 'static,
  C: CacheBackend + 'static,
{
  fn name(&self) -> &'static str { "sync_scores" }

  fn interval(&self) -> Duration { self.config.sync_interval() }

  async fn run_once(&self) {
    if let Err(e) = self.run().await {
      warn!(error = %e, "score sync failed");
    }
  }
}
