//! The Dirty-Set Tracker: which subjects' cached scores have diverged from
//! durable storage.
//!
//! All marks land in one cache-resident set. Draining removes the whole set
//! in a single atomic step, so a mark racing a drain ends up either in this
//! drain or the next one.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tally_core::{
  cache::CacheBackend,
  subject::{SubjectKind, SubjectRef},
};
use tracing::warn;

use crate::{
  error::{Error, Result, bounded},
  keys,
};

/// Subjects removed from the dirty set by one drain, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drained {
  pub threads:  BTreeSet<i64>,
  pub comments: BTreeSet<i64>,
}

impl Drained {
  pub fn is_empty(&self) -> bool { self.threads.is_empty() && self.comments.is_empty() }

  pub fn len(&self) -> usize { self.threads.len() + self.comments.len() }

  pub fn subjects(&self) -> impl Iterator<Item = SubjectRef> + '_ {
    let threads = self.threads.iter().map(|&id| SubjectRef { kind: SubjectKind::Thread, id });
    let comments = self.comments.iter().map(|&id| SubjectRef { kind: SubjectKind::Comment, id });
    threads.chain(comments)
  }

  fn insert(&mut self, subject: SubjectRef) {
    match subject.kind {
      SubjectKind::Thread => self.threads.insert(subject.id),
      SubjectKind::Comment => self.comments.insert(subject.id),
    };
  }
}

pub struct DirtySet<C> {
  cache:   Arc<C>,
  timeout: Duration,
}

impl<C> Clone for DirtySet<C> {
  fn clone(&self) -> Self { Self { cache: Arc::clone(&self.cache), timeout: self.timeout } }
}

impl<C: CacheBackend> DirtySet<C> {
  pub fn new(cache: Arc<C>, timeout: Duration) -> Self { Self { cache, timeout } }

  /// Record that `subject`'s cached score needs flushing. Idempotent.
  pub async fn mark(&self, subject: SubjectRef) -> Result<()> {
    self.mark_many(&[subject]).await
  }

  pub async fn mark_many(&self, subjects: &[SubjectRef]) -> Result<()> {
    if subjects.is_empty() {
      return Ok(());
    }
    let members: Vec<String> = subjects.iter().map(ToString::to_string).collect();
    bounded(
      self.timeout,
      "dirty mark",
      Error::cache,
      self.cache.set_insert(keys::DIRTY_BUCKET, &members),
    )
    .await?;

    // The timestamp is informational; losing it must not fail the mark.
    let touched = bounded(
      self.timeout,
      "dirty touch",
      Error::cache,
      self.cache.set(keys::DIRTY_TOUCHED, Utc::now().timestamp(), None),
    )
    .await;
    if let Err(e) = touched {
      warn!(error = %e, "failed to record dirty-set timestamp");
    }
    Ok(())
  }

  /// Atomically remove and return every dirty subject.
  pub async fn drain_all(&self) -> Result<Drained> {
    let members = bounded(
      self.timeout,
      "dirty drain",
      Error::cache,
      self.cache.set_take(keys::DIRTY_BUCKET),
    )
    .await?;

    let mut drained = Drained::default();
    for member in members {
      match member.parse::<SubjectRef>() {
        Ok(subject) => drained.insert(subject),
        Err(e) => warn!(%member, error = %e, "dropping malformed dirty-set member"),
      }
    }
    Ok(drained)
  }

  /// When a subject was last marked, if the cache still remembers.
  pub async fn last_marked_at(&self) -> Result<Option<DateTime<Utc>>> {
    let secs = bounded(
      self.timeout,
      "dirty touch read",
      Error::cache,
      self.cache.get(keys::DIRTY_TOUCHED),
    )
    .await?;
    Ok(secs.and_then(|s| DateTime::from_timestamp(s, 0)))
  }
}
