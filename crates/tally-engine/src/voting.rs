//! The Vote Request Handler.

use std::sync::Arc;

use tally_core::{
  cache::CacheBackend,
  store::{SubjectStore, VoteLedger},
  subject::SubjectRef,
  vote::{VoteDirection, VoteResult, VoterIdentity},
};
use tracing::{debug, info, warn};

use crate::{
  config::EngineConfig,
  dirty::DirtySet,
  error::{Error, Result, bounded},
  rate_limit::RateLimiter,
  score_cache::ScoreCache,
};

/// Applies vote actions and answers score queries.
///
/// The ledger is authoritative for individual votes. The score cache is
/// authoritative for live scores between reconciliation runs.
pub struct VoteService<S, C> {
  store:   Arc<S>,
  scores:  ScoreCache<S, C>,
  dirty:   DirtySet<C>,
  limiter: RateLimiter<C>,
  config:  Arc<EngineConfig>,
}

impl<S, C> VoteService<S, C>
where
  S: SubjectStore + VoteLedger,
  C: CacheBackend,
{
  pub fn new(store: Arc<S>, cache: Arc<C>, config: Arc<EngineConfig>) -> Self {
    Self {
      scores: ScoreCache::new(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&config)),
      dirty: DirtySet::new(Arc::clone(&cache), config.call_timeout()),
      limiter: RateLimiter::new(cache, &config),
      store,
      config,
    }
  }

  pub fn scores(&self) -> &ScoreCache<S, C> { &self.scores }

  pub fn dirty(&self) -> &DirtySet<C> { &self.dirty }

  /// Record `voter` clicking `direction` on `subject`.
  ///
  /// A ledger write whose cache update then fails is not rolled back; the
  /// error is returned and [`Self::recount`] repairs the score.
  pub async fn apply_vote(
    &self,
    subject:   SubjectRef,
    voter:     &VoterIdentity,
    direction: VoteDirection,
  ) -> Result<VoteResult> {
    self.limiter.check(voter).await?;
    self.ensure_exists(subject).await?;

    let transition = bounded(
      self.config.call_timeout(),
      "apply vote",
      Error::storage,
      self.store.apply_vote(subject, voter.clone(), direction),
    )
    .await?;
    let delta = transition.delta();

    if delta == 0 {
      let score = self.scores.get(subject).await?;
      debug!(%subject, %voter, %direction, "vote left ledger unchanged");
      return Ok(VoteResult {
        score,
        user_vote: transition.current,
        previous_vote: transition.previous,
        delta,
      });
    }

    let score = match self.scores.add(subject, delta).await {
      Ok(score) => score,
      Err(e) => {
        warn!(%subject, %voter, delta, error = %e, "vote recorded but score cache update failed");
        return Err(e);
      }
    };

    // The ledger and cache are already updated; a lost mark only delays
    // persistence until the next vote on this subject.
    if let Err(e) = self.dirty.mark(subject).await {
      warn!(%subject, error = %e, "failed to mark score dirty");
    }

    debug!(
      %subject,
      %voter,
      %direction,
      previous = transition.previous,
      current = transition.current,
      score,
      "vote applied"
    );
    Ok(VoteResult {
      score,
      user_vote: transition.current,
      previous_vote: transition.previous,
      delta,
    })
  }

  /// The voter's stored vote on `subject`, or 0 if none.
  pub async fn current_user_vote(&self, subject: SubjectRef, voter: &VoterIdentity) -> Result<i8> {
    self.ensure_exists(subject).await?;
    let vote = bounded(
      self.config.call_timeout(),
      "get vote",
      Error::storage,
      self.store.get_vote(subject, voter.clone()),
    )
    .await?;
    Ok(vote.map_or(0, |v| v.value))
  }

  pub async fn score(&self, subject: SubjectRef) -> Result<i64> {
    self.ensure_exists(subject).await?;
    self.scores.get(subject).await
  }

  /// Rebuild `subject`'s score from the ledger, overwriting both the cached
  /// and the durable value.
  pub async fn recount(&self, subject: SubjectRef) -> Result<i64> {
    self.ensure_exists(subject).await?;
    let tally = bounded(
      self.config.call_timeout(),
      "tally votes",
      Error::storage,
      self.store.tally(subject),
    )
    .await?;
    let score = tally.score();

    self.scores.set(subject, score).await?;
    bounded(
      self.config.call_timeout(),
      "write score",
      Error::storage,
      self.store.write_score(subject, score),
    )
    .await?;

    info!(%subject, up = tally.up, down = tally.down, score, "score recounted");
    Ok(score)
  }

  async fn ensure_exists(&self, subject: SubjectRef) -> Result<()> {
    let exists = bounded(
      self.config.call_timeout(),
      "subject lookup",
      Error::storage,
      self.store.exists(subject),
    )
    .await?;
    if exists { Ok(()) } else { Err(Error::NotFound(subject)) }
  }
}
