//! Durable storage traits: subject scores and the vote ledger.
//!
//! Implemented by storage backends (e.g. `tally-store-sqlite`). The engine
//! depends on these abstractions, never on a concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  subject::{RecentSubject, SubjectRef},
  vote::{Vote, VoteDirection, VoteTally, VoteTransition, VoterIdentity},
};

// ─── Subjects ────────────────────────────────────────────────────────────────

/// Durable per-subject score storage plus the existence check.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait SubjectStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// `true` iff a non-deleted subject of this kind has this id.
  fn exists(
    &self,
    subject: SubjectRef,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// The persisted score, or `None` if the subject does not exist.
  fn read_score(
    &self,
    subject: SubjectRef,
  ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + '_;

  fn write_score(
    &self,
    subject: SubjectRef,
    score: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn write_hot_score(
    &self,
    subject: SubjectRef,
    hot: f64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn read_created_at(
    &self,
    subject: SubjectRef,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;

  /// The `limit` most recently created non-deleted threads, newest first.
  fn list_recent_threads(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<RecentSubject>, Self::Error>> + Send + '_;
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// The durable one-row-per-(subject, voter) vote record.
pub trait VoteLedger: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Apply `direction` for `voter` on `subject` and return the stored value
  /// before and after.
  ///
  /// Reading the previous value, resolving the toggle (see
  /// [`VoteDirection::resolve`]) and writing the row happen atomically, so
  /// concurrent calls for the same voter and subject serialize. A resulting
  /// value of `0` deletes the row.
  fn apply_vote(
    &self,
    subject: SubjectRef,
    voter: VoterIdentity,
    direction: VoteDirection,
  ) -> impl Future<Output = Result<VoteTransition, Self::Error>> + Send + '_;

  /// The voter's current row, if any.
  fn get_vote(
    &self,
    subject: SubjectRef,
    voter: VoterIdentity,
  ) -> impl Future<Output = Result<Option<Vote>, Self::Error>> + Send + '_;

  /// Up/down counts over every row for `subject`.
  fn tally(
    &self,
    subject: SubjectRef,
  ) -> impl Future<Output = Result<VoteTally, Self::Error>> + Send + '_;
}
