//! Error types for `tally-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("subject ids must be positive, got {0}")]
  InvalidSubjectId(i64),

  #[error("unknown subject kind: {0:?}")]
  UnknownSubjectKind(String),

  #[error("invalid vote value: {0}")]
  InvalidVoteValue(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
