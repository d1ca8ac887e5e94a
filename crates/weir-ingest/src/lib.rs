//! Live-stream ingestion and historical backfill for the weir mirror.
//!
//! Both writers feed the store exclusively through the [`RecordStore`] trait,
//! which is what keeps secondary indexes consistent with record bodies no
//! matter which path a record arrived by.
//!
//! [`RecordStore`]: weir_core::store::RecordStore

pub mod backfill;
pub mod config;
pub mod error;
pub mod event;
pub mod stream;

pub use error::{IngestError, Result};
