//! Cache key layout. All keys share the `tally:` prefix.

use tally_core::{subject::SubjectRef, vote::Fingerprint};

/// The single set holding every dirty `kind:id` member.
pub const DIRTY_BUCKET: &str = "tally:dirty";

/// Unix seconds of the most recent mark into [`DIRTY_BUCKET`].
pub const DIRTY_TOUCHED: &str = "tally:dirty:touched";

pub fn score(subject: SubjectRef) -> String { format!("tally:score:{subject}") }

pub fn rate_window(fingerprint: &Fingerprint) -> String {
  format!("tally:rl:{fingerprint}")
}
