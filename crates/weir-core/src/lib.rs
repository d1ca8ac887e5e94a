//! Core types and trait definitions for the weir record mirror.
//!
//! This crate is deliberately free of database and network dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod collection;
pub mod error;
pub mod label;
pub mod query;
pub mod record;
pub mod store;

pub use error::{Error, Result};
