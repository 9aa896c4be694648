//! Subjects: the votable objects of the forum.
//!
//! Threads and comments live in separate id namespaces: thread 7 and comment
//! 7 are unrelated objects. Every reference to a subject therefore carries
//! its kind alongside the id.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

/// The kind of object a vote applies to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubjectKind {
  Thread,
  Comment,
}

/// A validated `(kind, id)` pair. Ids are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubjectRef {
  pub kind: SubjectKind,
  pub id:   i64,
}

impl SubjectRef {
  pub fn new(kind: SubjectKind, id: i64) -> Result<Self> {
    if id <= 0 {
      return Err(Error::InvalidSubjectId(id));
    }
    Ok(Self { kind, id })
  }

  pub fn thread(id: i64) -> Result<Self> { Self::new(SubjectKind::Thread, id) }

  pub fn comment(id: i64) -> Result<Self> { Self::new(SubjectKind::Comment, id) }
}

/// Formats as `kind:id`, e.g. `thread:12`.
impl fmt::Display for SubjectRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.id)
  }
}

impl FromStr for SubjectRef {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let (kind, id) = s
      .split_once(':')
      .ok_or_else(|| Error::UnknownSubjectKind(s.to_owned()))?;
    let kind = kind
      .parse::<SubjectKind>()
      .map_err(|_| Error::UnknownSubjectKind(kind.to_owned()))?;
    let id = id
      .parse::<i64>()
      .map_err(|_| Error::UnknownSubjectKind(s.to_owned()))?;
    Self::new(kind, id)
  }
}

/// One row of the recently-created-subjects feed used by hot ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSubject {
  pub id:         i64,
  /// The persisted (reconciled) score, not the cache-resident one.
  pub score:      i64,
  pub created_at: DateTime<Utc>,
}
