//! Handlers for `/votes` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/votes/{kind}/{id}` | Body: `{"direction":"up"\|"down"\|"neutral"}` |
//! | `GET`  | `/votes/{kind}/{id}/mine` | The caller's current vote |

use axum::{
  Json,
  extract::{Path, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use tally_core::{
  cache::CacheBackend,
  store::{SubjectStore, VoteLedger},
  vote::{VoteDirection, VoteResult},
};

use crate::{AppState, error::ApiError, identity::Voter, subject_from_path};

// ─── Cast ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct VoteBody {
  pub direction: VoteDirection,
}

/// `POST /votes/{kind}/{id}`
pub async fn cast<S, C>(
  State(state): State<AppState<S, C>>,
  Path(path): Path<(String, String)>,
  Voter(voter): Voter,
  body: Result<Json<VoteBody>, JsonRejection>,
) -> Result<Json<VoteResult>, ApiError>
where
  S: SubjectStore + VoteLedger + 'static,
  C: CacheBackend + 'static,
{
  let subject = subject_from_path(path)?;
  let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
  let result = state.votes.apply_vote(subject, &voter, body.direction).await?;
  Ok(Json(result))
}

// ─── Mine ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MyVote {
  pub vote: i8,
}

/// `GET /votes/{kind}/{id}/mine`
pub async fn mine<S, C>(
  State(state): State<AppState<S, C>>,
  Path(path): Path<(String, String)>,
  Voter(voter): Voter,
) -> Result<Json<MyVote>, ApiError>
where
  S: SubjectStore + VoteLedger + 'static,
  C: CacheBackend + 'static,
{
  let subject = subject_from_path(path)?;
  let vote = state.votes.current_user_vote(subject, &voter).await?;
  Ok(Json(MyVote { vote }))
}
