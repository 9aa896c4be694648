//! [`SqliteStore`], the SQLite implementation of [`SubjectStore`] and
//! [`VoteLedger`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tally_core::{
  store::{SubjectStore, VoteLedger},
  subject::{RecentSubject, SubjectRef},
  vote::{Vote, VoteDirection, VoteTally, VoteTransition, VoterIdentity, decode_vote_value},
};

use crate::{
  Error, Result,
  encode::{RawVote, decode_dt, encode_dt, encode_subject_kind, encode_voter, subject_table},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tally store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Seeding ───────────────────────────────────────────────────────────────
  //
  // Threads and comments are owned by the forum application; these exist so
  // the engine can be exercised against real rows.

  /// Insert a thread created at `created_at`.
  pub async fn insert_thread(&self, created_at: DateTime<Utc>) -> Result<SubjectRef> {
    let at_str = encode_dt(created_at);

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO threads (created_at) VALUES (?1)",
          rusqlite::params![at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(SubjectRef::thread(id)?)
  }

  /// Insert a comment on `thread_id` created at `created_at`.
  pub async fn insert_comment(
    &self,
    thread_id:  i64,
    created_at: DateTime<Utc>,
  ) -> Result<SubjectRef> {
    let at_str = encode_dt(created_at);

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO comments (thread_id, created_at) VALUES (?1, ?2)",
          rusqlite::params![thread_id, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(SubjectRef::comment(id)?)
  }

  /// Mark a subject deleted. Returns `false` if it was missing or already
  /// deleted.
  pub async fn soft_delete(&self, subject: SubjectRef) -> Result<bool> {
    let (table, id_col) = subject_table(subject.kind);
    let sql = format!(
      "UPDATE {table} SET deleted_at = ?2 WHERE {id_col} = ?1 AND deleted_at IS NULL"
    );
    let at_str = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, rusqlite::params![subject.id, at_str])?))
      .await?;

    Ok(changed > 0)
  }

  /// The persisted hot score, or `None` if the subject does not exist.
  pub async fn read_hot_score(&self, subject: SubjectRef) -> Result<Option<f64>> {
    let (table, id_col) = subject_table(subject.kind);
    let sql = format!("SELECT hot_score FROM {table} WHERE {id_col} = ?1");

    let hot = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![subject.id], |row| row.get(0))
            .optional()?,
        )
      })
      .await?;

    Ok(hot)
  }

  /// Run an `UPDATE` that must touch exactly the row of `subject`.
  async fn update_subject_column(
    &self,
    subject: SubjectRef,
    sql:     String,
    value:   rusqlite::types::Value,
  ) -> Result<()> {
    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, rusqlite::params![subject.id, value])?))
      .await?;

    if changed == 0 {
      return Err(Error::SubjectNotFound(subject));
    }
    Ok(())
  }
}

// ─── SubjectStore impl ───────────────────────────────────────────────────────

impl SubjectStore for SqliteStore {
  type Error = Error;

  async fn exists(&self, subject: SubjectRef) -> Result<bool> {
    let (table, id_col) = subject_table(subject.kind);
    let sql = format!("SELECT 1 FROM {table} WHERE {id_col} = ?1 AND deleted_at IS NULL");

    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![subject.id], |_| Ok(true))
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;

    Ok(exists)
  }

  async fn read_score(&self, subject: SubjectRef) -> Result<Option<i64>> {
    let (table, id_col) = subject_table(subject.kind);
    let sql = format!("SELECT score FROM {table} WHERE {id_col} = ?1 AND deleted_at IS NULL");

    let score = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![subject.id], |row| row.get(0))
            .optional()?,
        )
      })
      .await?;

    Ok(score)
  }

  async fn write_score(&self, subject: SubjectRef, score: i64) -> Result<()> {
    let (table, id_col) = subject_table(subject.kind);
    let sql = format!("UPDATE {table} SET score = ?2 WHERE {id_col} = ?1");
    self
      .update_subject_column(subject, sql, rusqlite::types::Value::Integer(score))
      .await
  }

  async fn write_hot_score(&self, subject: SubjectRef, hot: f64) -> Result<()> {
    let (table, id_col) = subject_table(subject.kind);
    let sql = format!("UPDATE {table} SET hot_score = ?2 WHERE {id_col} = ?1");
    self
      .update_subject_column(subject, sql, rusqlite::types::Value::Real(hot))
      .await
  }

  async fn read_created_at(&self, subject: SubjectRef) -> Result<Option<DateTime<Utc>>> {
    let (table, id_col) = subject_table(subject.kind);
    let sql = format!("SELECT created_at FROM {table} WHERE {id_col} = ?1");

    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![subject.id], |row| row.get(0))
            .optional()?,
        )
      })
      .await?;

    raw.as_deref().map(decode_dt).transpose()
  }

  async fn list_recent_threads(&self, limit: usize) -> Result<Vec<RecentSubject>> {
    let limit_val = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<(i64, i64, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT thread_id, score, created_at
           FROM threads
           WHERE deleted_at IS NULL
           ORDER BY created_at DESC, thread_id DESC
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(id, score, created_at)| {
        Ok(RecentSubject { id, score, created_at: decode_dt(&created_at)? })
      })
      .collect()
  }
}

// ─── VoteLedger impl ─────────────────────────────────────────────────────────

impl VoteLedger for SqliteStore {
  type Error = Error;

  async fn apply_vote(
    &self,
    subject:   SubjectRef,
    voter:     VoterIdentity,
    direction: VoteDirection,
  ) -> Result<VoteTransition> {
    let kind_str               = encode_subject_kind(subject.kind);
    let (voter_kind, voter_key) = encode_voter(&voter);
    let now_str                = encode_dt(Utc::now());

    let (previous_raw, current): (Option<i64>, i8) = self
      .conn
      .call(move |conn| {
        // IMMEDIATE takes the write lock up front, so two processes sharing
        // the file cannot both read the same previous value.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous: Option<i64> = tx
          .query_row(
            "SELECT value FROM votes
             WHERE subject_kind = ?1 AND subject_id = ?2
               AND voter_kind = ?3 AND voter_key = ?4",
            rusqlite::params![kind_str, subject.id, voter_kind, voter_key],
            |row| row.get(0),
          )
          .optional()?;

        // The CHECK constraint limits stored values to -1 and 1.
        let current = direction.resolve(previous.unwrap_or(0).signum() as i8);

        if current == 0 {
          tx.execute(
            "DELETE FROM votes
             WHERE subject_kind = ?1 AND subject_id = ?2
               AND voter_kind = ?3 AND voter_key = ?4",
            rusqlite::params![kind_str, subject.id, voter_kind, voter_key],
          )?;
        } else {
          tx.execute(
            "INSERT INTO votes (
               subject_kind, subject_id, voter_kind, voter_key,
               value, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (subject_kind, subject_id, voter_kind, voter_key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![kind_str, subject.id, voter_kind, voter_key, current, now_str],
          )?;
        }

        tx.commit()?;
        Ok((previous, current))
      })
      .await?;

    let previous = previous_raw.map(decode_vote_value).transpose()?.unwrap_or(0);
    Ok(VoteTransition { previous, current })
  }

  async fn get_vote(
    &self,
    subject: SubjectRef,
    voter:   VoterIdentity,
  ) -> Result<Option<Vote>> {
    let kind_str               = encode_subject_kind(subject.kind);
    let (voter_kind, voter_key) = encode_voter(&voter);

    let raw: Option<RawVote> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT value, created_at, updated_at FROM votes
               WHERE subject_kind = ?1 AND subject_id = ?2
                 AND voter_kind = ?3 AND voter_key = ?4",
              rusqlite::params![kind_str, subject.id, voter_kind, voter_key],
              |row| {
                Ok(RawVote {
                  value:      row.get(0)?,
                  created_at: row.get(1)?,
                  updated_at: row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(|r| r.into_vote(subject, voter)).transpose()
  }

  async fn tally(&self, subject: SubjectRef) -> Result<VoteTally> {
    let kind_str = encode_subject_kind(subject.kind);

    let (up, down) = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COALESCE(SUM(value = 1), 0), COALESCE(SUM(value = -1), 0)
           FROM votes
           WHERE subject_kind = ?1 AND subject_id = ?2",
          rusqlite::params![kind_str, subject.id],
          |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?)
      })
      .await?;

    Ok(VoteTally { up, down })
  }
}
