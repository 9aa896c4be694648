//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with fixed microsecond
//! precision. Voters are split into a kind column and a key column.

use chrono::{DateTime, SecondsFormat, Utc};
use tally_core::{
  subject::{SubjectKind, SubjectRef},
  vote::{Vote, VoterIdentity, decode_vote_value},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Subjects ────────────────────────────────────────────────────────────────

pub fn encode_subject_kind(k: SubjectKind) -> &'static str {
  match k {
    SubjectKind::Thread => "thread",
    SubjectKind::Comment => "comment",
  }
}

/// `(table, id column)` holding subjects of kind `k`.
pub fn subject_table(k: SubjectKind) -> (&'static str, &'static str) {
  match k {
    SubjectKind::Thread => ("threads", "thread_id"),
    SubjectKind::Comment => ("comments", "comment_id"),
  }
}

// ─── Voters ──────────────────────────────────────────────────────────────────

pub fn encode_voter(voter: &VoterIdentity) -> (&'static str, String) {
  match voter {
    VoterIdentity::User(id) => ("user", id.to_string()),
    VoterIdentity::Anonymous(fp) => ("anon", fp.as_str().to_owned()),
  }
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// A `votes` row as read from SQLite, before validation.
pub struct RawVote {
  pub value:      i64,
  pub created_at: String,
  pub updated_at: String,
}

impl RawVote {
  pub fn into_vote(self, subject: SubjectRef, voter: VoterIdentity) -> Result<Vote> {
    Ok(Vote {
      subject,
      voter,
      value: decode_vote_value(self.value)?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}
