//! `tallyd`: the Tally vote-scoring server.
//!
//! Reads `tally.toml` (or the path given with `--config`) plus `TALLY_*`
//! environment overrides, opens the SQLite store and the configured cache,
//! then either serves the HTTP API with the periodic jobs or runs a single
//! maintenance command and exits.

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tally_cache_redis::RedisCache;
use tally_core::{cache::CacheBackend, subject::{SubjectKind, SubjectRef}};
use tally_engine::{Engine, memory::MemoryCache};
use tally_server::{CacheConfig, ServerConfig, load_config};
use tally_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Tally vote-scoring server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tally.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Clone)]
enum Command {
  /// Serve the HTTP API and run the periodic jobs (default).
  Serve,
  /// Flush dirty cached scores to storage once.
  SyncScores,
  /// Recalculate hot scores for the newest threads once.
  RecalcHot,
  /// Rebuild one subject's score from its votes.
  Recount {
    #[arg(long)]
    kind: SubjectKind,
    #[arg(long)]
    id:   i64,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let command = cli.command.unwrap_or(Command::Serve);

  let server_cfg = load_config(cli.config).context("failed to load configuration")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  match &server_cfg.cache {
    CacheConfig::Memory => {
      if !matches!(command, Command::Serve) {
        warn!("in-process cache is empty outside `serve`; this command sees no cached scores");
      }
      run(command, &server_cfg, store, Arc::new(MemoryCache::new())).await
    }
    CacheConfig::Redis(redis_cfg) => {
      let cache = RedisCache::connect(&server_cfg.redis_for_engine(redis_cfg))
        .await
        .context("failed to connect to redis")?;
      run(command, &server_cfg, store, Arc::new(cache)).await
    }
  }
}

async fn run<C>(
  command:    Command,
  server_cfg: &ServerConfig,
  store:      Arc<SqliteStore>,
  cache:      Arc<C>,
) -> anyhow::Result<()>
where
  C: CacheBackend + 'static,
{
  let engine = Engine::new(store, cache, server_cfg.engine.clone());

  match command {
    Command::Serve => serve(server_cfg, &engine).await,
    Command::SyncScores => {
      let report = engine.reconciler.run().await.context("score sync failed")?;
      println!("{}", serde_json::to_string(&report)?);
      Ok(())
    }
    Command::RecalcHot => {
      let report = engine.hot.run().await.context("hot score recalculation failed")?;
      println!("{}", serde_json::to_string(&report)?);
      Ok(())
    }
    Command::Recount { kind, id } => {
      let subject = SubjectRef::new(kind, id)?;
      let score = engine.votes.recount(subject).await.context("recount failed")?;
      println!("{}", serde_json::json!({ "subject": subject, "score": score }));
      Ok(())
    }
  }
}

async fn serve<C>(server_cfg: &ServerConfig, engine: &Engine<SqliteStore, C>) -> anyhow::Result<()>
where
  C: CacheBackend + 'static,
{
  let app = tally_server::router(Arc::clone(&engine.votes), server_cfg.identity.clone());
  let scheduler = server_cfg.run_jobs.then(|| engine.start_jobs());

  let address = format!("{}:{}", server_cfg.host, server_cfg.port);
  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  if let Some(scheduler) = scheduler {
    scheduler.shutdown().await;
  }
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
