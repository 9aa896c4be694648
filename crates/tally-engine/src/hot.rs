//! The Hot-Score Recalculation Job.
//!
//! Recomputes [`hot_score_at`] for the newest threads from their persisted
//! scores. Comments are ranked by score alone and are not touched.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tally_core::{hot::hot_score_at, store::SubjectStore, subject::SubjectRef};
use tracing::{info, warn};

use crate::{
  config::EngineConfig,
  error::{Error, Result, bounded},
  scheduler::PeriodicJob,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HotReport {
  pub updated: usize,
  pub failed:  usize,
}

pub struct HotScoreJob<S> {
  store:  Arc<S>,
  config: Arc<EngineConfig>,
}

impl<S: SubjectStore> HotScoreJob<S> {
  pub fn new(store: Arc<S>, config: Arc<EngineConfig>) -> Self { Self { store, config } }

  pub async fn run(&self) -> Result<HotReport> {
    let threads = bounded(
      self.config.call_timeout(),
      "list recent threads",
      Error::storage,
      self.store.list_recent_threads(self.config.hot_window),
    )
    .await?;

    let mut report = HotReport::default();
    for thread in threads {
      let subject = match SubjectRef::thread(thread.id) {
        Ok(subject) => subject,
        Err(e) => {
          warn!(id = thread.id, error = %e, "skipping thread with invalid id");
          report.failed += 1;
          continue;
        }
      };

      let hot = hot_score_at(thread.score, thread.created_at);
      let written = bounded(
        self.config.call_timeout(),
        "write hot score",
        Error::storage,
        self.store.write_hot_score(subject, hot),
      )
      .await;
      match written {
        Ok(()) => report.updated += 1,
        Err(e) => {
          warn!(%subject, error = %e, "failed to write hot score");
          report.failed += 1;
        }
      }
    }

    info!(updated = report.updated, failed = report.failed, "recalculated hot scores");
    Ok(report)
  }
}

impl<S: SubjectStore + 'static> PeriodicJob for HotScoreJob<S> {
  fn name(&self) -> &'static str { "recalculate_hot_scores" }

  fn interval(&self) -> Duration { self.config.hot_interval() }

  async fn run_once(&self) {
    if let Err(e) = self.run().await {
      warn!(error = %e, "hot score recalculation failed");
    }
  }
}
