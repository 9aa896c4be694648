//! Time-decayed "hot" ranking.
//!
//! `hot = sign(score) * log10(max(|score|, 1)) + (created - EPOCH_OFFSET) / 45000`
//!
//! A tenfold score increase is worth 45000 seconds (12.5 hours) of age.

use chrono::{DateTime, Utc};

/// Fixed site epoch. Changing it shifts every existing ranking at once.
pub const EPOCH_OFFSET: i64 = 1_134_028_003;

/// Seconds of age equivalent to one order of magnitude of score.
pub const DECAY_SECONDS: f64 = 45_000.0;

const PRECISION: f64 = 1e7;

/// Hot score for `score` at `created_at_epoch` (Unix seconds), rounded to 7
/// decimal digits.
pub fn hot_score(score: i64, created_at_epoch: i64) -> f64 {
  let order = (score.unsigned_abs().max(1) as f64).log10();
  let sign = score.signum() as f64;
  let seconds = (created_at_epoch - EPOCH_OFFSET) as f64;
  round_7(sign * order + seconds / DECAY_SECONDS)
}

pub fn hot_score_at(score: i64, created_at: DateTime<Utc>) -> f64 {
  hot_score(score, created_at.timestamp())
}

fn round_7(x: f64) -> f64 { (x * PRECISION).round() / PRECISION }
