//! Core types and trait definitions for the Tally vote-scoring engine.
//!
//! This crate is deliberately free of HTTP, database and cache-client
//! dependencies. Storage and cache backends implement the traits defined
//! here; the engine and API crates depend only on those traits.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod cache;
pub mod error;
pub mod hot;
pub mod store;
pub mod subject;
pub mod vote;

pub use error::{Error, Result};
