//! `GET /scores/{kind}/{id}`: the live score of one subject.

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Serialize;
use tally_core::{
  cache::CacheBackend,
  store::{SubjectStore, VoteLedger},
};

use crate::{AppState, error::ApiError, subject_from_path};

#[derive(Debug, Serialize)]
pub struct ScoreBody {
  pub score: i64,
}

pub async fn get_one<S, C>(
  State(state): State<AppState<S, C>>,
  Path(path): Path<(String, String)>,
) -> Result<Json<ScoreBody>, ApiError>
where
  S: SubjectStore + VoteLedger + 'static,
  C: CacheBackend + 'static,
{
  let subject = subject_from_path(path)?;
  let score = state.votes.score(subject).await?;
  Ok(Json(ScoreBody { score }))
}
