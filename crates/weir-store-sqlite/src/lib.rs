//! SQLite backend for the weir record mirror.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime, which also makes store calls safe from
//! any concurrent logical flow (stream callback, backfill loop, request
//! handler).

mod cursor;
mod encode;
mod query;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
