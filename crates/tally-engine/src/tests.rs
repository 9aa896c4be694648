//! End-to-end engine tests against in-memory SQLite and [`MemoryCache`].

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tally_core::{
  cache::CacheBackend,
  hot::EPOCH_OFFSET,
  store::{SubjectStore, VoteLedger},
  subject::SubjectRef,
  vote::{Fingerprint, VoteDirection, VoterIdentity},
};
use tally_store_sqlite::SqliteStore;

use crate::{Engine, EngineConfig, Error, ReconcileReport, keys, memory::MemoryCache};

struct Harness {
  engine: Engine<SqliteStore, MemoryCache>,
  store:  Arc<SqliteStore>,
  cache:  Arc<MemoryCache>,
}

async fn harness_with(cache: MemoryCache, config: EngineConfig) -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let cache = Arc::new(cache);
  let engine = Engine::new(Arc::clone(&store), Arc::clone(&cache), config);
  Harness { engine, store, cache }
}

async fn harness() -> Harness { harness_with(MemoryCache::new(), EngineConfig::default()).await }

fn user(id: i64) -> VoterIdentity { VoterIdentity::User(id) }

fn anon(ip: &str) -> VoterIdentity {
  VoterIdentity::Anonymous(Fingerprint::derive(ip, "Mozilla/5.0"))
}

impl Harness {
  async fn thread(&self) -> SubjectRef { self.store.insert_thread(Utc::now()).await.unwrap() }

  async fn dirty_subjects(&self) -> Vec<SubjectRef> {
    let drained = self.engine.votes.dirty().drain_all().await.unwrap();
    let subjects: Vec<SubjectRef> = drained.subjects().collect();
    // Put them back so the caller's view is non-destructive.
    self.engine.votes.dirty().mark_many(&subjects).await.unwrap();
    subjects
  }
}

// ─── Vote handling ───────────────────────────────────────────────────────────

#[tokio::test]
async fn upvote_then_repeat_retracts() {
  let h = harness().await;
  let thread = h.thread().await;

  let first = h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Up).await.unwrap();
  assert_eq!((first.score, first.user_vote, first.previous_vote, first.delta), (1, 1, 0, 1));

  let second = h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Up).await.unwrap();
  assert_eq!((second.score, second.user_vote, second.previous_vote, second.delta), (0, 0, 1, -1));

  assert!(h.store.get_vote(thread, user(1)).await.unwrap().is_none());
  assert_eq!(h.engine.votes.current_user_vote(thread, &user(1)).await.unwrap(), 0);
}

#[tokio::test]
async fn switching_direction_moves_score_by_two() {
  let h = harness().await;
  let thread = h.thread().await;

  h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Up).await.unwrap();
  let flipped = h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Down).await.unwrap();

  assert_eq!(flipped.delta, -2);
  assert_eq!(flipped.score, -1);
  assert_eq!(flipped.previous_vote, 1);
  assert_eq!(h.engine.votes.current_user_vote(thread, &user(1)).await.unwrap(), -1);
}

#[tokio::test]
async fn neutral_without_prior_vote_changes_nothing() {
  let h = harness().await;
  let thread = h.thread().await;
  h.store.write_score(thread, 4).await.unwrap();

  let result = h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Neutral).await.unwrap();

  assert_eq!((result.score, result.user_vote, result.previous_vote, result.delta), (4, 0, 0, 0));
  assert!(h.dirty_subjects().await.is_empty());
}

#[tokio::test]
async fn neutral_retracts_an_existing_vote() {
  let h = harness().await;
  let thread = h.thread().await;

  h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Down).await.unwrap();
  let result = h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Neutral).await.unwrap();

  assert_eq!((result.score, result.previous_vote, result.delta), (0, -1, 1));
}

#[tokio::test]
async fn vote_marks_subject_dirty() {
  let h = harness().await;
  let thread = h.thread().await;
  let comment = h.store.insert_comment(thread.id, Utc::now()).await.unwrap();

  h.engine.votes.apply_vote(comment, &anon("192.0.2.7"), VoteDirection::Up).await.unwrap();

  assert_eq!(h.dirty_subjects().await, vec![comment]);
}

#[tokio::test]
async fn missing_deleted_and_wrong_kind_subjects_are_not_found() {
  let h = harness().await;
  let thread = h.thread().await;
  let deleted = h.thread().await;
  h.store.soft_delete(deleted).await.unwrap();
  let wrong_kind = SubjectRef::comment(thread.id).unwrap();
  let missing = SubjectRef::thread(9_999).unwrap();

  for subject in [deleted, wrong_kind, missing] {
    let err = h.engine.votes.apply_vote(subject, &user(1), VoteDirection::Up).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(s) if s == subject), "{subject}: {err}");
  }
  assert!(h.dirty_subjects().await.is_empty());
  assert!(h.store.get_vote(wrong_kind, user(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn vote_on_cache_miss_starts_from_durable_score() {
  let h = harness().await;
  let thread = h.thread().await;
  h.store.write_score(thread, 20).await.unwrap();

  let result = h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Down).await.unwrap();
  assert_eq!(result.score, 19);
}

#[tokio::test]
async fn concurrent_voters_are_all_counted() {
  let h = harness().await;
  let thread = h.thread().await;

  let mut handles = Vec::new();
  for id in 1..=40 {
    let votes = Arc::clone(&h.engine.votes);
    let direction = if id % 4 == 0 { VoteDirection::Down } else { VoteDirection::Up };
    handles.push(tokio::spawn(async move {
      votes.apply_vote(thread, &user(id), direction).await.unwrap()
    }));
  }
  for handle in handles {
    handle.await.unwrap();
  }

  // 30 up, 10 down.
  assert_eq!(h.engine.votes.score(thread).await.unwrap(), 20);
  assert_eq!(h.store.tally(thread).await.unwrap().score(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cas_backend_counts_concurrent_voters() {
  // Enough attempts that no writer reaches the direct-write fallback.
  let config = EngineConfig { cas_attempts: 32, ..Default::default() };
  let h = harness_with(MemoryCache::without_atomic_incr(), config).await;
  let thread = h.thread().await;

  let mut handles = Vec::new();
  for id in 1..=25 {
    let votes = Arc::clone(&h.engine.votes);
    handles.push(tokio::spawn(async move {
      votes.apply_vote(thread, &user(id), VoteDirection::Up).await.unwrap()
    }));
  }
  for handle in handles {
    handle.await.unwrap();
  }

  assert_eq!(h.engine.votes.score(thread).await.unwrap(), 25);
}

// ─── Rate limiting ───────────────────────────────────────────────────────────

#[tokio::test]
async fn sixty_first_anonymous_vote_is_rejected_without_effect() {
  let h = harness().await;
  let thread = h.thread().await;
  let voter = anon("203.0.113.50");

  for _ in 0..60 {
    h.engine.votes.apply_vote(thread, &voter, VoteDirection::Up).await.unwrap();
  }
  // An even number of toggles leaves no vote.
  assert_eq!(h.engine.votes.current_user_vote(thread, &voter).await.unwrap(), 0);

  let err = h.engine.votes.apply_vote(thread, &voter, VoteDirection::Up).await.unwrap_err();
  assert!(matches!(err, Error::RateLimited { .. }), "{err}");
  assert_eq!(h.engine.votes.current_user_vote(thread, &voter).await.unwrap(), 0);
  assert_eq!(h.engine.votes.score(thread).await.unwrap(), 0);

  // Other voters are unaffected.
  h.engine.votes.apply_vote(thread, &anon("203.0.113.51"), VoteDirection::Up).await.unwrap();
  h.engine.votes.apply_vote(thread, &user(3), VoteDirection::Up).await.unwrap();
  assert_eq!(h.engine.votes.score(thread).await.unwrap(), 2);
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn reconciliation_persists_cached_scores() {
  let h = harness().await;
  let a = h.thread().await;
  let b = h.store.insert_comment(a.id, Utc::now()).await.unwrap();

  h.engine.votes.apply_vote(a, &user(1), VoteDirection::Up).await.unwrap();
  h.engine.votes.apply_vote(a, &user(2), VoteDirection::Up).await.unwrap();
  h.engine.votes.apply_vote(b, &user(1), VoteDirection::Down).await.unwrap();
  assert_eq!(h.store.read_score(a).await.unwrap(), Some(0));

  let report = h.engine.reconciler.run().await.unwrap();

  assert_eq!((report.flushed, report.skipped, report.failed), (2, 0, 0));
  assert_eq!(h.store.read_score(a).await.unwrap(), Some(2));
  assert_eq!(h.store.read_score(b).await.unwrap(), Some(-1));
  assert!(h.dirty_subjects().await.is_empty());

  let idle = h.engine.reconciler.run().await.unwrap();
  assert_eq!(idle, ReconcileReport::default());
}

#[tokio::test]
async fn reconciliation_skips_evicted_scores() {
  let h = harness().await;
  let thread = h.thread().await;
  h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Up).await.unwrap();
  h.cache.evict(&keys::score(thread));

  let report = h.engine.reconciler.run().await.unwrap();

  assert_eq!((report.flushed, report.skipped), (0, 1));
  assert_eq!(h.store.read_score(thread).await.unwrap(), Some(0));
}

#[tokio::test]
async fn failed_flushes_are_marked_dirty_again() {
  let h = harness().await;
  let thread = h.thread().await;
  let ghost = SubjectRef::comment(777).unwrap();
  h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Up).await.unwrap();
  h.engine.votes.scores().set(ghost, 5).await.unwrap();
  h.engine.votes.dirty().mark(ghost).await.unwrap();

  let report = h.engine.reconciler.run().await.unwrap();

  assert_eq!((report.flushed, report.failed), (1, 1));
  assert_eq!(h.store.read_score(thread).await.unwrap(), Some(1));
  assert_eq!(h.dirty_subjects().await, vec![ghost]);
}

#[tokio::test]
async fn marks_during_a_run_survive_for_the_next() {
  let h = harness().await;
  let thread = h.thread().await;
  h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Up).await.unwrap();
  h.engine.reconciler.run().await.unwrap();

  h.engine.votes.apply_vote(thread, &user(2), VoteDirection::Up).await.unwrap();
  assert_eq!(h.store.read_score(thread).await.unwrap(), Some(1));

  h.engine.reconciler.run().await.unwrap();
  assert_eq!(h.store.read_score(thread).await.unwrap(), Some(2));
}

// ─── Recount ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn recount_restores_ledger_sum() {
  let h = harness().await;
  let thread = h.thread().await;
  h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Up).await.unwrap();
  h.engine.votes.apply_vote(thread, &user(2), VoteDirection::Up).await.unwrap();
  h.engine.votes.apply_vote(thread, &user(3), VoteDirection::Down).await.unwrap();

  // Simulate drift: the cache lost its entry and storage holds a stale value.
  h.cache.evict(&keys::score(thread));
  h.store.write_score(thread, 40).await.unwrap();
  assert_eq!(h.engine.votes.score(thread).await.unwrap(), 40);

  assert_eq!(h.engine.votes.recount(thread).await.unwrap(), 1);
  assert_eq!(h.engine.votes.score(thread).await.unwrap(), 1);
  assert_eq!(h.store.read_score(thread).await.unwrap(), Some(1));
}

#[tokio::test]
async fn recount_of_missing_subject_is_not_found() {
  let h = harness().await;
  let ghost = SubjectRef::thread(31).unwrap();
  assert!(matches!(h.engine.votes.recount(ghost).await, Err(Error::NotFound(_))));
}

// ─── Hot scores ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn hot_job_writes_formula_from_durable_score() {
  let h = harness().await;
  let at_epoch = h.store.insert_thread(Utc.timestamp_opt(EPOCH_OFFSET, 0).unwrap()).await.unwrap();
  let later = h
    .store
    .insert_thread(Utc.timestamp_opt(EPOCH_OFFSET + 45_000, 0).unwrap())
    .await
    .unwrap();
  h.store.write_score(at_epoch, 10).await.unwrap();
  h.store.write_score(later, -5).await.unwrap();

  let report = h.engine.hot.run().await.unwrap();

  assert_eq!((report.updated, report.failed), (2, 0));
  assert_eq!(h.store.read_hot_score(at_epoch).await.unwrap(), Some(1.0));
  assert_eq!(h.store.read_hot_score(later).await.unwrap(), Some(0.30103));
}

#[tokio::test]
async fn hot_job_ignores_cached_scores_and_dirty_set() {
  let h = harness().await;
  let thread = h.store.insert_thread(Utc.timestamp_opt(EPOCH_OFFSET, 0).unwrap()).await.unwrap();
  h.engine.votes.apply_vote(thread, &user(1), VoteDirection::Up).await.unwrap();

  h.engine.hot.run().await.unwrap();

  // Durable score is still 0, so the order term is log10(1) = 0.
  assert_eq!(h.store.read_hot_score(thread).await.unwrap(), Some(0.0));
  assert_eq!(h.dirty_subjects().await, vec![thread]);
  assert_eq!(h.cache.get(&keys::score(thread)).await.unwrap(), Some(1));
}

#[tokio::test]
async fn hot_job_limits_itself_to_newest_threads() {
  let config = EngineConfig { hot_window: 2, ..Default::default() };
  let h = harness_with(MemoryCache::new(), config).await;
  let now = Utc::now();
  let oldest = h.store.insert_thread(now - ChronoDuration::days(3)).await.unwrap();
  let newer = h.store.insert_thread(now - ChronoDuration::days(1)).await.unwrap();
  let newest = h.store.insert_thread(now).await.unwrap();

  let report = h.engine.hot.run().await.unwrap();

  assert_eq!(report.updated, 2);
  assert_eq!(h.store.read_hot_score(oldest).await.unwrap(), Some(0.0));
  assert!(h.store.read_hot_score(newer).await.unwrap().unwrap() > 0.0);
  assert!(h.store.read_hot_score(newest).await.unwrap().unwrap() > 0.0);
}
