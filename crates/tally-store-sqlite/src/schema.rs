//! SQL schema for the Tally SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Timestamps are RFC 3339 UTC with fixed microsecond precision, so they
-- sort lexically in time order.
CREATE TABLE IF NOT EXISTS threads (
    thread_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at  TEXT    NOT NULL,
    deleted_at  TEXT,
    score       INTEGER NOT NULL DEFAULT 0,   -- written by reconciliation only
    hot_score   REAL    NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS comments (
    comment_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id   INTEGER NOT NULL REFERENCES threads(thread_id),
    created_at  TEXT    NOT NULL,
    deleted_at  TEXT,
    score       INTEGER NOT NULL DEFAULT 0,
    hot_score   REAL    NOT NULL DEFAULT 0
);

-- One row per (subject, voter). A retracted vote deletes its row.
CREATE TABLE IF NOT EXISTS votes (
    subject_kind TEXT    NOT NULL,   -- 'thread' | 'comment'
    subject_id   INTEGER NOT NULL,
    voter_kind   TEXT    NOT NULL,   -- 'user' | 'anon'
    voter_key    TEXT    NOT NULL,   -- user id or fingerprint
    value        INTEGER NOT NULL,
    created_at   TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL,
    PRIMARY KEY (subject_kind, subject_id, voter_kind, voter_key),
    CHECK (value IN (-1, 1))
);

CREATE INDEX IF NOT EXISTS threads_created_idx  ON threads(created_at);
CREATE INDEX IF NOT EXISTS comments_thread_idx  ON comments(thread_id);

PRAGMA user_version = 1;
";
