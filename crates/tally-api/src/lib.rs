//! JSON REST API for Tally.
//!
//! Exposes an axum [`Router`] over a [`VoteService`]. TLS and user
//! authentication belong to the forum application in front of it.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tally_api::api_router(engine.votes.clone(), IdentityConfig::default()))
//! ```

pub mod error;
pub mod identity;
pub mod scores;
pub mod votes;


use std::sync::Arc;

use axum::{
  Router,
  extract::FromRef,
  routing::{get, post},
};
use tally_core::{
  cache::CacheBackend,
  store::{SubjectStore, VoteLedger},
  subject::{SubjectKind, SubjectRef},
};
use tally_engine::VoteService;

pub use error::ApiError;
pub use identity::{IdentityConfig, Voter};

/// Router state shared by every handler.
pub struct AppState<S, C> {
  pub votes:    Arc<VoteService<S, C>>,
  pub identity: Arc<IdentityConfig>,
}

impl<S, C> Clone for AppState<S, C> {
  fn clone(&self) -> Self {
    Self { votes: Arc::clone(&self.votes), identity: Arc::clone(&self.identity) }
  }
}

impl<S, C> FromRef<AppState<S, C>> for Arc<IdentityConfig> {
  fn from_ref(state: &AppState<S, C>) -> Self { Arc::clone(&state.identity) }
}

/// Build a fully-materialised API router around `votes`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, C>(votes: Arc<VoteService<S, C>>, identity: IdentityConfig) -> Router<()>
where
  S: SubjectStore + VoteLedger + 'static,
  C: CacheBackend + 'static,
{
  Router::new()
    .route("/votes/{kind}/{id}", post(votes::cast::<S, C>))
    .route("/votes/{kind}/{id}/mine", get(votes::mine::<S, C>))
    .route("/scores/{kind}/{id}", get(scores::get_one::<S, C>))
    .with_state(AppState { votes, identity: Arc::new(identity) })
}

/// Parse the `{kind}/{id}` path segments. Ids must be positive.
fn subject_from_path((kind, id): (String, String)) -> Result<SubjectRef, ApiError> {
  let kind = kind
    .parse::<SubjectKind>()
    .map_err(|_| ApiError::BadRequest(format!("unknown subject kind {kind:?}")))?;
  let id = id
    .parse::<i64>()
    .map_err(|_| ApiError::BadRequest(format!("invalid subject id {id:?}")))?;
  Ok(SubjectRef::new(kind, id)?)
}
