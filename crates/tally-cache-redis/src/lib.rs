//! Redis backend for the Tally [`CacheBackend`].
//!
//! Plain reads and writes are single commands. Compound operations
//! (increment-if-present, compare-and-set, take-all, windowed count) run as
//! Lua scripts, which Redis executes atomically.

use std::time::Duration;

use redis::{
  Client, RedisError, Script, Value,
  aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::Deserialize;
use tally_core::cache::{CacheBackend, WindowCount};
use tracing::info;

type Result<T, E = RedisError> = std::result::Result<T, E>;

const INCR_EXISTING: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('INCRBY', KEYS[1], ARGV[1])
end
return false
";

const COMPARE_AND_SET: &str = r"
local current = redis.call('GET', KEYS[1])
if current == false or tonumber(current) ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
return 1
";

const SET_TAKE: &str = r"
local members = redis.call('SMEMBERS', KEYS[1])
redis.call('DEL', KEYS[1])
return members
";

const INCR_WINDOW: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Connection settings, deserialised from the server's `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
  pub url:                 String,
  pub retries:             usize,
  pub connect_timeout_ms:  u64,
  /// Keep above the engine's `call_timeout_ms` so a slow reply surfaces as
  /// an engine timeout rather than a connection error.
  pub response_timeout_ms: u64,
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self {
      url:                 "redis://127.0.0.1:6379/".to_owned(),
      retries:             1,
      connect_timeout_ms:  500,
      response_timeout_ms: 2_500,
    }
  }
}

struct Scripts {
  incr_existing:   Script,
  compare_and_set: Script,
  set_take:        Script,
  incr_window:     Script,
}

/// A [`CacheBackend`] over a shared, auto-reconnecting Redis connection.
///
/// Cloning the inner [`ConnectionManager`] is cheap and every clone
/// multiplexes onto the same connection.
pub struct RedisCache {
  conn:    ConnectionManager,
  scripts: Scripts,
}

impl RedisCache {
  pub async fn connect(config: &RedisConfig) -> Result<Self> {
    let manager_config = ConnectionManagerConfig::new()
      .set_number_of_retries(config.retries)
      .set_connection_timeout(Duration::from_millis(config.connect_timeout_ms))
      .set_response_timeout(Duration::from_millis(config.response_timeout_ms));

    let client = Client::open(config.url.as_str())?;
    let conn = client.get_connection_manager_with_config(manager_config).await?;
    info!(retries = config.retries, "connected to redis");

    Ok(Self {
      conn,
      scripts: Scripts {
        incr_existing:   Script::new(INCR_EXISTING),
        compare_and_set: Script::new(COMPARE_AND_SET),
        set_take:        Script::new(SET_TAKE),
        incr_window:     Script::new(INCR_WINDOW),
      },
    })
  }
}

fn millis(d: Duration) -> u64 { u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1) }

/// Whether the command may have run even though no reply arrived. A refused
/// connection never reached the server.
fn reply_lost(error: &RedisError) -> bool {
  (error.is_timeout() || error.is_io_error() || error.is_connection_dropped())
    && !error.is_connection_refusal()
}

impl CacheBackend for RedisCache {
  type Error = RedisError;

  fn is_ambiguous(&self, error: &RedisError) -> bool { reply_lost(error) }

  async fn get<'a>(&'a self, key: &'a str) -> Result<Option<i64>> {
    let mut conn = self.conn.clone();
    let value: Option<i64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
    Ok(value)
  }

  async fn set<'a>(&'a self, key: &'a str, value: i64, ttl: Option<Duration>) -> Result<()> {
    let mut conn = self.conn.clone();
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
      cmd.arg("PX").arg(millis(ttl));
    }
    let _: Value = cmd.query_async(&mut conn).await?;
    Ok(())
  }

  async fn set_if_absent<'a>(
    &'a self,
    key:   &'a str,
    value: i64,
    ttl:   Option<Duration>,
  ) -> Result<bool> {
    let mut conn = self.conn.clone();
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value).arg("NX");
    if let Some(ttl) = ttl {
      cmd.arg("PX").arg(millis(ttl));
    }
    let reply: Value = cmd.query_async(&mut conn).await?;
    Ok(!matches!(reply, Value::Nil))
  }

  async fn incr_existing<'a>(&'a self, key: &'a str, delta: i64) -> Result<Option<i64>> {
    let mut conn = self.conn.clone();
    let value: Option<i64> = self
      .scripts
      .incr_existing
      .key(key)
      .arg(delta)
      .invoke_async(&mut conn)
      .await?;
    Ok(value)
  }

  async fn compare_and_set<'a>(&'a self, key: &'a str, expected: i64, new: i64) -> Result<bool> {
    let mut conn = self.conn.clone();
    let swapped: i64 = self
      .scripts
      .compare_and_set
      .key(key)
      .arg(expected)
      .arg(new)
      .invoke_async(&mut conn)
      .await?;
    Ok(swapped == 1)
  }

  async fn set_insert<'a>(&'a self, key: &'a str, members: &'a [String]) -> Result<()> {
    if members.is_empty() {
      return Ok(());
    }
    let mut conn = self.conn.clone();
    let _: i64 = redis::cmd("SADD").arg(key).arg(members).query_async(&mut conn).await?;
    Ok(())
  }

  async fn set_take<'a>(&'a self, key: &'a str) -> Result<Vec<String>> {
    let mut conn = self.conn.clone();
    let members: Vec<String> = self.scripts.set_take.key(key).invoke_async(&mut conn).await?;
    Ok(members)
  }

  async fn incr_window<'a>(&'a self, key: &'a str, window: Duration) -> Result<WindowCount> {
    let mut conn = self.conn.clone();
    let (count, ttl_ms): (i64, i64) = self
      .scripts
      .incr_window
      .key(key)
      .arg(millis(window))
      .invoke_async(&mut conn)
      .await?;
    Ok(WindowCount {
      count,
      resets_in: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // Needs a disposable Redis at TALLY_TEST_REDIS_URL (or localhost).
  async fn cache() -> RedisCache {
    let url = std::env::var("TALLY_TEST_REDIS_URL")
      .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_owned());
    RedisCache::connect(&RedisConfig { url, ..Default::default() })
      .await
      .expect("redis reachable")
  }

  #[test]
  fn lost_replies_are_ambiguous() {
    use std::io;

    let reset = RedisError::from(io::Error::from(io::ErrorKind::ConnectionReset));
    let timed_out = RedisError::from(io::Error::from(io::ErrorKind::TimedOut));
    let refused = RedisError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
    let wrong_type = RedisError::from((redis::ErrorKind::TypeError, "not an integer"));

    assert!(reply_lost(&reset));
    assert!(reply_lost(&timed_out));
    assert!(!reply_lost(&refused));
    assert!(!reply_lost(&wrong_type));
  }

  #[tokio::test]
  #[ignore = "requires a running redis"]
  async fn primitives_against_live_redis() {
    let cache = cache().await;
    let key = "tally:test:counter";
    let set = "tally:test:set";
    let window = "tally:test:window";
    for k in [key, set, window] {
      let mut conn = cache.conn.clone();
      let _: i64 = redis::cmd("DEL").arg(k).query_async(&mut conn).await.unwrap();
    }

    assert_eq!(cache.incr_existing(key, 1).await.unwrap(), None);
    assert!(cache.set_if_absent(key, 10, Some(Duration::from_secs(60))).await.unwrap());
    assert!(!cache.set_if_absent(key, 99, None).await.unwrap());
    assert_eq!(cache.incr_existing(key, -3).await.unwrap(), Some(7));
    assert!(!cache.compare_and_set(key, 6, 1).await.unwrap());
    assert!(cache.compare_and_set(key, 7, 1).await.unwrap());
    assert_eq!(cache.get(key).await.unwrap(), Some(1));

    cache.set_insert(set, &["thread:1".to_owned(), "comment:1".to_owned()]).await.unwrap();
    let mut taken = cache.set_take(set).await.unwrap();
    taken.sort();
    assert_eq!(taken, vec!["comment:1", "thread:1"]);
    assert!(cache.set_take(set).await.unwrap().is_empty());

    let first = cache.incr_window(window, Duration::from_secs(60)).await.unwrap();
    let second = cache.incr_window(window, Duration::from_secs(60)).await.unwrap();
    assert_eq!((first.count, second.count), (1, 2));
    assert!(second.resets_in <= Duration::from_secs(60));
  }
}
