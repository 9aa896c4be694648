//! Votes, voter identities and the toggle rule.
//!
//! A stored vote value is always `-1` or `+1`. "No vote" is represented by
//! the absence of a ledger row, never by a stored zero.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result, subject::SubjectRef};

// ─── Direction ───────────────────────────────────────────────────────────────

/// What the voter clicked.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VoteDirection {
  Up,
  Down,
  /// Explicit retraction.
  Neutral,
}

impl VoteDirection {
  pub fn value(self) -> i8 {
    match self {
      Self::Up => 1,
      Self::Down => -1,
      Self::Neutral => 0,
    }
  }

  /// The vote value that results from clicking `self` when `previous` is
  /// stored. Clicking the same direction twice retracts the vote.
  pub fn resolve(self, previous: i8) -> i8 {
    let target = self.value();
    if target == previous { 0 } else { target }
  }
}

/// Validate a value read back from storage.
pub fn decode_vote_value(raw: i64) -> Result<i8> {
  match raw {
    -1 => Ok(-1),
    1 => Ok(1),
    other => Err(Error::InvalidVoteValue(other)),
  }
}

// ─── Identity ────────────────────────────────────────────────────────────────

/// Hex SHA-256 of client IP and user agent; identifies anonymous voters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
  pub fn derive(ip: &str, user_agent: &str) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Who is voting. Built by the caller (the HTTP layer), never read from
/// ambient request state inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoterIdentity {
  User(i64),
  Anonymous(Fingerprint),
}

impl VoterIdentity {
  pub fn is_anonymous(&self) -> bool { matches!(self, Self::Anonymous(_)) }
}

impl fmt::Display for VoterIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::User(id) => write!(f, "user:{id}"),
      Self::Anonymous(fp) => write!(f, "anon:{fp}"),
    }
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// One ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
  pub subject:    SubjectRef,
  pub voter:      VoterIdentity,
  /// `-1` or `+1`.
  pub value:      i8,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// The ledger state before and after one vote action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTransition {
  pub previous: i8,
  pub current:  i8,
}

impl VoteTransition {
  pub fn delta(&self) -> i64 { i64::from(self.current) - i64::from(self.previous) }
}

/// Up and down counts for one subject, summed from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VoteTally {
  pub up:   i64,
  pub down: i64,
}

impl VoteTally {
  pub fn score(&self) -> i64 { self.up - self.down }
}

/// Outcome of one vote action, returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteResult {
  pub score:         i64,
  pub user_vote:     i8,
  pub previous_vote: i8,
  pub delta:         i64,
}
