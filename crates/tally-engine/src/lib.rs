//! The Tally scoring engine: vote handling, the score cache, dirty tracking
//! and the periodic reconciliation and hot-ranking jobs.
//!
//! Everything here is generic over a [`SubjectStore`] + [`VoteLedger`]
//! backend and a [`CacheBackend`]. [`memory::MemoryCache`] is the in-process
//! cache; networked caches live in their own crates.
//!
//! [`SubjectStore`]: tally_core::store::SubjectStore
//! [`VoteLedger`]: tally_core::store::VoteLedger
//! [`CacheBackend`]: tally_core::cache::CacheBackend

pub mod config;
pub mod dirty;
pub mod error;
pub mod hot;
pub mod memory;
pub mod rate_limit;
pub mod reconcile;
pub mod scheduler;
pub mod score_cache;
pub mod voting;

mod keys;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use tally_core::{
  cache::CacheBackend,
  store::{SubjectStore, VoteLedger},
};

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use hot::{HotReport, HotScoreJob};
pub use reconcile::{ReconcileReport, Reconciler};
pub use scheduler::{PeriodicJob, Scheduler};
pub use voting::VoteService;

/// The vote service and both jobs wired to one store and one cache.
pub struct Engine<S, C> {
  pub votes:      Arc<VoteService<S, C>>,
  pub reconciler: Arc<Reconciler<S, C>>,
  pub hot:        Arc<HotScoreJob<S>>,
}

impl<S, C> Engine<S, C>
where
  S: SubjectStore + VoteLedger + 'static,
  C: CacheBackend + 'static,
{
  pub fn new(store: Arc<S>, cache: Arc<C>, config: EngineConfig) -> Self {
    let config = Arc::new(config);
    Self {
      votes:      Arc::new(VoteService::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::clone(&config),
      )),
      reconciler: Arc::new(Reconciler::new(Arc::clone(&store), cache, Arc::clone(&config))),
      hot:        Arc::new(HotScoreJob::new(store, config)),
    }
  }

  /// Start both periodic jobs.
  pub fn start_jobs(&self) -> Scheduler {
    let mut scheduler = Scheduler::new();
    scheduler.spawn(Arc::clone(&self.reconciler));
    scheduler.spawn(Arc::clone(&self.hot));
    scheduler
  }
}
