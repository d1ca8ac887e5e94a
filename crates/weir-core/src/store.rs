//! The `RecordStore` and `LabelStore` traits.
//!
//! Implemented by storage backends (e.g. `weir-store-sqlite`). The stream
//! ingestor and backfill reconciler write exclusively through these traits,
//! which is what guarantees secondary indexes stay consistent with record
//! bodies.
//!
//! All methods return `Send` futures so the traits can be used from
//! multi-threaded async runtimes.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
  label::{Label, LabelQuery},
  query::{FacetFilter, Filter, ListQuery, Page},
  record::{Actor, Record, RecordUri},
};

// ─── RecordStore ─────────────────────────────────────────────────────────────

/// Abstraction over the record mirror's read/write path.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Insert-or-replace a record by URI (upsert keyed on URI, not cid).
  ///
  /// Recomputes the KV rows for the collection's configured index fields and
  /// the facet rows from `json.facets`, all in one transaction with the
  /// record write. Last write wins by call order; redelivering the same
  /// `uri`/`cid` pair leaves the stored row, `indexed_at` included,
  /// unchanged.
  fn put_record<'a>(
    &'a self,
    uri: &'a RecordUri,
    cid: &'a str,
    json: Value,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + 'a;

  /// Remove a record and its KV rows (facet rows cascade). Returns whether a
  /// record existed.
  fn delete_record<'a>(
    &'a self,
    uri: &'a RecordUri,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Fetch one record. Missing records are `None`, never an error.
  fn get_record<'a>(
    &'a self,
    uri: &'a RecordUri,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + 'a;

  /// Filtered, ordered, cursor-paginated read over one collection.
  fn list_records<'a>(
    &'a self,
    collection: &'a str,
    query: ListQuery,
  ) -> impl Future<Output = Result<Page, Self::Error>> + Send + 'a;

  /// Count with the identical filter construction as [`list_records`], minus
  /// ordering and pagination.
  ///
  /// [`list_records`]: RecordStore::list_records
  fn count_records<'a>(
    &'a self,
    collection: &'a str,
    filter: Option<Filter>,
    facet: Option<FacetFilter>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  // ── Actors ────────────────────────────────────────────────────────────

  /// Lazily create an actor on first observation; refresh the handle when a
  /// newer one is supplied. Never deletes.
  fn ensure_actor<'a>(
    &'a self,
    did: &'a str,
    handle: Option<&'a str>,
  ) -> impl Future<Output = Result<Actor, Self::Error>> + Send + 'a;

  fn get_actor<'a>(
    &'a self,
    did: &'a str,
  ) -> impl Future<Output = Result<Option<Actor>, Self::Error>> + Send + 'a;

  /// Advance the actor's notification watermark.
  fn set_last_seen_notifs<'a>(
    &'a self,
    did: &'a str,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── LabelStore ──────────────────────────────────────────────────────────────

/// Abstraction over moderation-label storage.
pub trait LabelStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Conditional upsert on `(src, uri, cid, val)`: an incoming row only
  /// overwrites when its `cts` is not older than the stored one.
  fn put_label(
    &self,
    label: Label,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Resolve the authoritative labels for each subject: max-`cts` per
  /// `(src, uri, val)`, negations and expired rows dropped. An empty
  /// subject list short-circuits to an empty result.
  fn query_labels<'a>(
    &'a self,
    query: &'a LabelQuery,
  ) -> impl Future<Output = Result<Vec<Label>, Self::Error>> + Send + 'a;

  /// Administrative full wipe, used for re-sync.
  fn clear_labels(&self)
  -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
