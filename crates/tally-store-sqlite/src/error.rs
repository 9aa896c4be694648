//! Error type for `tally-store-sqlite`.

use tally_core::subject::SubjectRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tally_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A score write targeted a subject row that does not exist.
  #[error("subject not found: {0}")]
  SubjectNotFound(SubjectRef),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
