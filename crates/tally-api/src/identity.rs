//! Resolving the voter behind a request.
//!
//! The forum application authenticates users and forwards the user id in a
//! trusted header. Requests without it are anonymous and identified by a
//! fingerprint of client IP and user agent.
//!
//! The client IP is the socket peer unless the server sits behind reverse
//! proxies and `trust_forwarded_headers` is set. `X-Forwarded-For` is then
//! read from the right: each trusted proxy appends the address it saw, so
//! the entry `trusted_proxies` from the end is the first one no proxy vouches
//! for. Entries to its left are client-supplied and ignored.

use std::{net::SocketAddr, sync::Arc};

use axum::{
  extract::{ConnectInfo, FromRef, FromRequestParts},
  http::{HeaderMap, header::USER_AGENT, request::Parts},
};
use serde::Deserialize;
use tally_core::vote::{Fingerprint, VoterIdentity};

use crate::error::ApiError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
  /// Header carrying the authenticated user id.
  pub user_header:             String,
  /// Disable when the API is reachable without the forum in front of it.
  pub trust_user_header:       bool,
  /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
  pub trust_forwarded_headers: bool,
  /// Reverse proxies between the client and this server.
  pub trusted_proxies:         usize,
}

impl Default for IdentityConfig {
  fn default() -> Self {
    Self {
      user_header:             "x-forum-user-id".to_owned(),
      trust_user_header:       true,
      trust_forwarded_headers: false,
      trusted_proxies:         1,
    }
  }
}

/// Extractor yielding the request's [`VoterIdentity`].
#[derive(Debug, Clone)]
pub struct Voter(pub VoterIdentity);

impl<St> FromRequestParts<St> for Voter
where
  Arc<IdentityConfig>: FromRef<St>,
  St: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &St) -> Result<Self, Self::Rejection> {
    let config = Arc::<IdentityConfig>::from_ref(state);
    let peer = parts
      .extensions
      .get::<ConnectInfo<SocketAddr>>()
      .map(|ConnectInfo(addr)| *addr);
    resolve(&config, &parts.headers, peer).map(Voter)
  }
}

fn resolve(
  config:  &IdentityConfig,
  headers: &HeaderMap,
  peer:    Option<SocketAddr>,
) -> Result<VoterIdentity, ApiError> {
  let trusted = config
    .trust_user_header
    .then(|| headers.get(config.user_header.as_str()))
    .flatten();
  if let Some(raw) = trusted {
    let id = raw
      .to_str()
      .ok()
      .and_then(|s| s.trim().parse::<i64>().ok())
      .filter(|id| *id > 0)
      .ok_or_else(|| ApiError::BadRequest(format!("invalid {} header", config.user_header)))?;
    return Ok(VoterIdentity::User(id));
  }

  let ip = client_ip(config, headers, peer).unwrap_or_else(|| "unknown".to_owned());
  let user_agent = headers
    .get(USER_AGENT)
    .and_then(|v| v.to_str().ok())
    .unwrap_or_default();
  Ok(VoterIdentity::Anonymous(Fingerprint::derive(&ip, user_agent)))
}

/// The trusted `X-Forwarded-For` hop, then `X-Real-IP`, when forwarded
/// headers are trusted; otherwise the socket peer.
fn client_ip(
  config:  &IdentityConfig,
  headers: &HeaderMap,
  peer:    Option<SocketAddr>,
) -> Option<String> {
  let peer_ip = peer.map(|addr| addr.ip().to_string());
  if !config.trust_forwarded_headers {
    return peer_ip;
  }

  let header = |name: &str| {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|s| !s.is_empty())
  };

  let forwarded = header("x-forwarded-for").and_then(|list| {
    let hops: Vec<&str> = list.split(',').map(str::trim).filter(|h| !h.is_empty()).collect();
    let index = hops.len().saturating_sub(config.trusted_proxies.max(1));
    hops.get(index).map(|hop| (*hop).to_owned())
  });

  forwarded
    .or_else(|| header("x-real-ip").map(str::to_owned))
    .or(peer_ip)
}
