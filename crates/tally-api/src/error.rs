//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header::RETRY_AFTER},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Engine(#[from] tally_engine::Error),
}

impl From<tally_core::Error> for ApiError {
  fn from(e: tally_core::Error) -> Self { Self::BadRequest(e.to_string()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    use tally_engine::Error as E;

    let message = self.to_string();
    let (status, retry_after) = match &self {
      ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
      ApiError::Engine(E::NotFound(_)) => (StatusCode::NOT_FOUND, None),
      ApiError::Engine(E::RateLimited { retry_after }) => {
        // Round up so clients never retry inside the window.
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        (StatusCode::TOO_MANY_REQUESTS, Some(secs.max(1)))
      }
      ApiError::Engine(e) if e.is_transient() => {
        warn!(error = %e, "backend unavailable");
        (StatusCode::SERVICE_UNAVAILABLE, None)
      }
      ApiError::Engine(e) => {
        error!(error = %e, "unhandled engine error");
        (StatusCode::INTERNAL_SERVER_ERROR, None)
      }
    };

    let mut response = (status, Json(json!({ "error": message }))).into_response();
    if let Some(secs) = retry_after {
      response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    response
  }
}
