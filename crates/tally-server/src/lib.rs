//! Tally server: configuration and HTTP wiring for the `tallyd` binary.

use std::{path::PathBuf, sync::Arc};

use axum::Router;
use config::{ConfigError, Environment, File};
use serde::Deserialize;
use tally_api::IdentityConfig;
use tally_cache_redis::RedisConfig;
use tally_core::{
  cache::CacheBackend,
  store::{SubjectStore, VoteLedger},
};
use tally_engine::{EngineConfig, VoteService};
use tower_http::trace::TraceLayer;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Top-level configuration, read from TOML and `TALLY_*` environment
/// variables (`TALLY_CACHE__URL` sets `cache.url`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  /// Run the periodic jobs inside `serve`. Disable on all but one node if
  /// double runs are unwanted.
  pub run_jobs:   bool,
  pub cache:      CacheConfig,
  pub engine:     EngineConfig,
  pub identity:   IdentityConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".to_owned(),
      port:       8087,
      store_path: PathBuf::from("~/.local/share/tally/tally.db"),
      run_jobs:   true,
      cache:      CacheConfig::default(),
      engine:     EngineConfig::default(),
      identity:   IdentityConfig::default(),
    }
  }
}

impl ServerConfig {
  /// `redis` with its response timeout raised above the engine's call
  /// timeout, so an unanswered write is reported as a timeout by the engine.
  pub fn redis_for_engine(&self, redis: &RedisConfig) -> RedisConfig {
    let floor = self.engine.call_timeout_ms.saturating_add(500);
    RedisConfig { response_timeout_ms: redis.response_timeout_ms.max(floor), ..redis.clone() }
  }
}

/// Which cache backend holds live scores, dirty marks and rate windows.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CacheConfig {
  /// In-process; only correct for a single server process.
  #[default]
  Memory,
  Redis(RedisConfig),
}

/// Load configuration from `path` (optional) overlaid with the environment.
pub fn load_config(path: PathBuf) -> Result<ServerConfig, ConfigError> {
  config::Config::builder()
    .add_source(File::from(path).required(false))
    .add_source(
      Environment::with_prefix("TALLY")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()?
    .try_deserialize()
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// The API router with request tracing.
pub fn router<S, C>(votes: Arc<VoteService<S, C>>, identity: IdentityConfig) -> Router
where
  S: SubjectStore + VoteLedger + 'static,
  C: CacheBackend + 'static,
{
  tally_api::api_router(votes, identity).layer(TraceLayer::new_for_http())
}
