//! In-process [`CacheBackend`] for single-node deployments and tests.
//!
//! Every operation takes one short critical section on a `std::sync::Mutex`,
//! which makes each primitive atomic. Expiry uses `tokio::time::Instant` so
//! tests can drive windows with a paused clock.

use std::{
  collections::{BTreeSet, HashMap},
  sync::{Mutex, MutexGuard},
  time::Duration,
};

use tally_core::cache::{CacheBackend, WindowCount};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum MemoryCacheError {
  #[error("key {0:?} holds a value of another type")]
  WrongType(String),
}

type Result<T, E = MemoryCacheError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
enum Value {
  Int(i64),
  Set(BTreeSet<String>),
}

#[derive(Debug)]
struct Entry {
  value:      Value,
  expires_at: Option<Instant>,
}

impl Entry {
  fn new(value: Value, ttl: Option<Duration>) -> Self {
    Self { value, expires_at: ttl.map(|t| Instant::now() + t) }
  }

  fn is_live(&self, now: Instant) -> bool { self.expires_at.is_none_or(|at| at > now) }
}

#[derive(Debug)]
pub struct MemoryCache {
  entries:     Mutex<HashMap<String, Entry>>,
  atomic_incr: bool,
}

impl Default for MemoryCache {
  fn default() -> Self { Self::new() }
}

impl MemoryCache {
  pub fn new() -> Self {
    Self { entries: Mutex::new(HashMap::new()), atomic_incr: true }
  }

  /// A cache that reports no native atomic increment, so callers take the
  /// compare-and-set path.
  pub fn without_atomic_incr() -> Self {
    Self { atomic_incr: false, ..Self::new() }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
    // A panic while holding the lock cannot leave an entry half-written.
    self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Lock and drop `key` if it has expired.
  fn lock_fresh(&self, key: &str) -> MutexGuard<'_, HashMap<String, Entry>> {
    let mut entries = self.lock();
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
      entries.remove(key);
    }
    entries
  }

  /// Number of live keys.
  pub fn len(&self) -> usize {
    let now = Instant::now();
    self.lock().values().filter(|e| e.is_live(now)).count()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Drop `key` as if it had been evicted.
  pub fn evict(&self, key: &str) { self.lock().remove(key); }
}

fn int_of(key: &str, entry: &Entry) -> Result<i64> {
  match entry.value {
    Value::Int(v) => Ok(v),
    Value::Set(_) => Err(MemoryCacheError::WrongType(key.to_owned())),
  }
}

impl CacheBackend for MemoryCache {
  type Error = MemoryCacheError;

  async fn get<'a>(&'a self, key: &'a str) -> Result<Option<i64>> {
    let entries = self.lock_fresh(key);
    entries.get(key).map(|e| int_of(key, e)).transpose()
  }

  async fn set<'a>(&'a self, key: &'a str, value: i64, ttl: Option<Duration>) -> Result<()> {
    self.lock().insert(key.to_owned(), Entry::new(Value::Int(value), ttl));
    Ok(())
  }

  async fn set_if_absent<'a>(
    &'a self,
    key:   &'a str,
    value: i64,
    ttl:   Option<Duration>,
  ) -> Result<bool> {
    let mut entries = self.lock_fresh(key);
    if entries.contains_key(key) {
      return Ok(false);
    }
    entries.insert(key.to_owned(), Entry::new(Value::Int(value), ttl));
    Ok(true)
  }

  async fn incr_existing<'a>(&'a self, key: &'a str, delta: i64) -> Result<Option<i64>> {
    let mut entries = self.lock_fresh(key);
    let Some(entry) = entries.get_mut(key) else {
      return Ok(None);
    };
    let next = int_of(key, entry)?.saturating_add(delta);
    entry.value = Value::Int(next);
    Ok(Some(next))
  }

  async fn compare_and_set<'a>(&'a self, key: &'a str, expected: i64, new: i64) -> Result<bool> {
    let mut entries = self.lock_fresh(key);
    let Some(entry) = entries.get_mut(key) else {
      return Ok(false);
    };
    if int_of(key, entry)? != expected {
      return Ok(false);
    }
    entry.value = Value::Int(new);
    Ok(true)
  }

  fn supports_atomic_incr(&self) -> bool { self.atomic_incr }

  async fn set_insert<'a>(&'a self, key: &'a str, members: &'a [String]) -> Result<()> {
    let mut entries = self.lock_fresh(key);
    let entry = entries
      .entry(key.to_owned())
      .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new()), None));
    match &mut entry.value {
      Value::Set(set) => {
        set.extend(members.iter().cloned());
        Ok(())
      }
      Value::Int(_) => Err(MemoryCacheError::WrongType(key.to_owned())),
    }
  }

  async fn set_take<'a>(&'a self, key: &'a str) -> Result<Vec<String>> {
    let mut entries = self.lock_fresh(key);
    match entries.remove(key) {
      None => Ok(Vec::new()),
      Some(Entry { value: Value::Set(set), .. }) => Ok(set.into_iter().collect()),
      Some(other) => {
        entries.insert(key.to_owned(), other);
        Err(MemoryCacheError::WrongType(key.to_owned()))
      }
    }
  }

  async fn incr_window<'a>(&'a self, key: &'a str, window: Duration) -> Result<WindowCount> {
    let mut entries = self.lock_fresh(key);
    let now = Instant::now();
    let entry = entries
      .entry(key.to_owned())
      .or_insert_with(|| Entry::new(Value::Int(0), Some(window)));
    let count = int_of(key, entry)?.saturating_add(1);
    entry.value = Value::Int(count);
    let resets_in = entry
      .expires_at
      .map(|at| at.saturating_duration_since(now))
      .unwrap_or(window);
    Ok(WindowCount { count, resets_in })
  }
}
