//! Periodic job runner.
//!
//! Each job gets its own task and interval timer. Nothing coordinates runs
//! across processes, so jobs must tolerate running twice.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
  sync::watch,
  task::JoinSet,
  time::MissedTickBehavior,
};
use tracing::{debug, info};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub trait PeriodicJob: Send + Sync + 'static {
  /// Stable name used in logs.
  fn name(&self) -> &'static str;

  fn interval(&self) -> Duration;

  /// One run. Failures are logged by the job itself.
  fn run_once(&self) -> impl Future<Output = ()> + Send + '_;
}

pub struct Scheduler {
  tasks:    JoinSet<()>,
  shutdown: watch::Sender<bool>,
}

impl Default for Scheduler {
  fn default() -> Self { Self::new() }
}

impl Scheduler {
  pub fn new() -> Self {
    let (shutdown, _) = watch::channel(false);
    Self { tasks: JoinSet::new(), shutdown }
  }

  /// Start running `job`: once immediately, then every interval. Ticks
  /// missed while a run is in progress are skipped.
  pub fn spawn<J: PeriodicJob>(&mut self, job: Arc<J>) {
    let mut shutdown = self.shutdown.subscribe();
    let period = job.interval().max(MIN_INTERVAL);
    info!(job = job.name(), ?period, "scheduling job");

    self.tasks.spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        tokio::select! {
          _ = ticker.tick() => {
            debug!(job = job.name(), "running job");
            job.run_once().await;
          }
          _ = shutdown.changed() => break,
        }
      }
      debug!(job = job.name(), "job stopped");
    });
  }

  pub fn len(&self) -> usize { self.tasks.len() }

  pub fn is_empty(&self) -> bool { self.tasks.is_empty() }

  /// Signal every job to stop and wait for in-flight runs to finish.
  pub async fn shutdown(mut self) {
    let _ = self.shutdown.send(true);
    while self.tasks.join_next().await.is_some() {}
    info!("scheduler stopped");
  }
}
