//! Historical backfill: page a repository's current records out of its
//! origin over HTTP and replay them through the store.
//!
//! Backfill uses the same upsert path as the live stream, so running both at
//! once converges on the newest write per URI instead of corrupting indexes.

use std::{future::Future, sync::Arc, time::Duration};

use serde::Deserialize;
use serde_json::Value;
use weir_core::{record::RecordUri, store::RecordStore};

use crate::error::{IngestError, Result};

// ─── Source ──────────────────────────────────────────────────────────────────

/// One page of records as listed by an origin.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPage {
  pub records: Vec<ListedRecord>,
  #[serde(default)]
  pub cursor:  Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListedRecord {
  pub uri:   String,
  pub cid:   String,
  pub value: Value,
}

/// Where backfill pages come from. The production impl is
/// [`BackfillClient`]; tests substitute canned pages.
pub trait RecordSource: Send + Sync {
  fn list_records<'a>(
    &'a self,
    did: &'a str,
    collection: &'a str,
    cursor: Option<&'a str>,
  ) -> impl Future<Output = Result<RecordPage>> + Send + 'a;
}

// ─── HTTP client ─────────────────────────────────────────────────────────────

/// `com.atproto.repo.listRecords` client against a single origin.
pub struct BackfillClient {
  http:       reqwest::Client,
  origin:     String,
  page_limit: u32,
}

impl BackfillClient {
  pub fn new(origin: impl Into<String>) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()?;
    Ok(BackfillClient {
      http,
      origin: origin.into().trim_end_matches('/').to_string(),
      page_limit: 100,
    })
  }

  pub fn with_page_limit(mut self, limit: u32) -> Self {
    self.page_limit = limit;
    self
  }
}

impl RecordSource for BackfillClient {
  async fn list_records(
    &self,
    did: &str,
    collection: &str,
    cursor: Option<&str>,
  ) -> Result<RecordPage> {
    let url = format!("{}/xrpc/com.atproto.repo.listRecords", self.origin);
    let mut request = self
      .http
      .get(&url)
      .query(&[("repo", did), ("collection", collection)])
      .query(&[("limit", self.page_limit)]);
    if let Some(cursor) = cursor {
      request = request.query(&[("cursor", cursor)]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
      return Err(IngestError::BackfillStatus {
        status:     response.status().as_u16(),
        did:        did.to_string(),
        collection: collection.to_string(),
      });
    }
    Ok(response.json().await?)
  }
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillSummary {
  pub fetched: u64,
  pub indexed: u64,
  pub failed:  u64,
}

/// Walks every `(did, collection)` pair and upserts what the origin lists.
///
/// A bad record or an unreachable pair is logged and counted, never fatal;
/// a partial backfill that keeps going beats an aborted one.
pub struct BackfillReconciler<S, C> {
  store:  Arc<S>,
  source: C,
}

impl<S, C> BackfillReconciler<S, C>
where
  S: RecordStore,
  C: RecordSource,
{
  pub fn new(store: Arc<S>, source: C) -> Self { BackfillReconciler { store, source } }

  pub fn source(&self) -> &C { &self.source }

  pub async fn reconcile(
    &self,
    dids: &[String],
    collections: &[String],
  ) -> BackfillSummary {
    let mut summary = BackfillSummary::default();
    for did in dids {
      for collection in collections {
        if let Err(e) = self.reconcile_one(did, collection, &mut summary).await {
          summary.failed += 1;
          tracing::warn!(
            did = %did,
            collection = %collection,
            error = %e,
            "backfill pair failed, moving on"
          );
        }
      }
    }
    tracing::info!(
      fetched = summary.fetched,
      indexed = summary.indexed,
      failed = summary.failed,
      "backfill finished"
    );
    summary
  }

  async fn reconcile_one(
    &self,
    did: &str,
    collection: &str,
    summary: &mut BackfillSummary,
  ) -> Result<()> {
    tracing::debug!(did = %did, collection = %collection, "backfilling");
    self
      .store
      .ensure_actor(did, None)
      .await
      .map_err(IngestError::store)?;
    let mut cursor: Option<String> = None;
    loop {
      let page = self
        .source
        .list_records(did, collection, cursor.as_deref())
        .await?;
      let page_empty = page.records.is_empty();

      for listed in page.records {
        summary.fetched += 1;
        match RecordUri::parse(&listed.uri) {
          Ok(uri) => {
            match self.store.put_record(&uri, &listed.cid, listed.value).await {
              Ok(_) => summary.indexed += 1,
              Err(e) => {
                summary.failed += 1;
                tracing::warn!(uri = %listed.uri, error = %e, "backfill upsert failed");
              }
            }
          }
          Err(e) => {
            summary.failed += 1;
            tracing::warn!(uri = %listed.uri, error = %e, "skipping record with malformed uri");
          }
        }
      }

      match page.cursor {
        Some(next) if !page_empty => cursor = Some(next),
        _ => return Ok(()),
      }
    }
  }
}
