//! [`SqliteStore`] — the SQLite implementation of [`RecordStore`] and
//! [`LabelStore`].

use std::{collections::HashMap, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use serde_json::Value;

use weir_core::{
  collection::CollectionIndexes,
  label::{Label, LabelQuery},
  query::{FacetFilter, Filter, ListQuery, Page},
  record::{Actor, Facet, Record, RecordUri},
  store::{LabelStore, RecordStore},
};

use crate::{
  Error, Result,
  cursor::Cursor,
  encode::{
    RawActor, RawLabel, RawRecord, decode_ts, encode_ts, sql_value_to_text,
    value_to_text,
  },
  query::{ListPlan, Plan, compile_count, compile_list},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A record mirror backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted, and all
/// statements run serially on its worker thread, which is what makes a
/// compound `put` (record + KV sync + facet reindex, one transaction) safe
/// to issue from the stream callback and the backfill loop concurrently.
#[derive(Clone)]
pub struct SqliteStore {
  conn:    tokio_rusqlite::Connection,
  indexes: Arc<CollectionIndexes>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(
    path: impl AsRef<Path>,
    indexes: CollectionIndexes,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, indexes: Arc::new(indexes) };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory(indexes: CollectionIndexes) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, indexes: Arc::new(indexes) };
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

  /// The collection → hot-field configuration this store was built with.
  pub fn indexes(&self) -> &CollectionIndexes { &self.indexes }
}

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  async fn put_record(
    &self,
    uri: &RecordUri,
    cid: &str,
    json: Value,
  ) -> Result<Record> {
    if !json.is_object() {
      return Err(Error::Core(weir_core::Error::BodyNotObject));
    }

    let mut record = Record {
      uri:        uri.to_string(),
      cid:        cid.to_owned(),
      did:        uri.did().to_owned(),
      collection: uri.collection().to_owned(),
      json,
      indexed_at: Utc::now(),
    };

    // KV rows: configured fields that are actually present in the body.
    let kv: Vec<(String, String)> = self
      .indexes
      .fields_for(uri.collection())
      .iter()
      .filter_map(|field| {
        record.json.get(field).map(|v| (field.clone(), value_to_text(v)))
      })
      .collect();

    let facets: Vec<(String, String)> = Facet::extract(&record.json)
      .into_iter()
      .map(|f| (f.kind.as_str().to_owned(), f.value))
      .collect();

    let uri_str = record.uri.clone();
    let cid_str = record.cid.clone();
    let did_str = record.did.clone();
    let collection_str = record.collection.clone();
    let json_str = serde_json::to_string(&record.json)?;
    let indexed_at_str = encode_ts(record.indexed_at);

    let stored_indexed_at: String = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // An unchanged cid keeps the stored watermark, so redelivering the
        // same revision leaves the row byte-for-byte identical.
        tx.execute(
          "INSERT INTO records (uri, cid, did, collection, json, indexed_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(uri) DO UPDATE SET
             cid        = excluded.cid,
             did        = excluded.did,
             collection = excluded.collection,
             json       = excluded.json,
             indexed_at = CASE WHEN records.cid = excluded.cid
                          THEN records.indexed_at
                          ELSE excluded.indexed_at END",
          rusqlite::params![
            uri_str,
            cid_str,
            did_str,
            collection_str,
            json_str,
            indexed_at_str,
          ],
        )?;

        // Sync KV rows: drop fields no longer present or configured, then
        // upsert the current set.
        if kv.is_empty() {
          tx.execute(
            "DELETE FROM record_kv WHERE uri = ?1",
            rusqlite::params![uri_str],
          )?;
        } else {
          let sql = format!(
            "DELETE FROM record_kv WHERE uri = ? AND key NOT IN ({})",
            placeholders(kv.len()),
          );
          let params = std::iter::once(uri_str.clone())
            .chain(kv.iter().map(|(k, _)| k.clone()));
          tx.execute(&sql, rusqlite::params_from_iter(params))?;

          for (key, value) in &kv {
            tx.execute(
              "INSERT INTO record_kv (uri, key, value) VALUES (?1, ?2, ?3)
               ON CONFLICT(uri, key) DO UPDATE SET value = excluded.value",
              rusqlite::params![uri_str, key, value],
            )?;
          }
        }

        // Facet reindex is always delete-all-then-reinsert, so the index is
        // never partially stale after a successful write.
        tx.execute(
          "DELETE FROM record_facets WHERE uri = ?1",
          rusqlite::params![uri_str],
        )?;
        for (kind, value) in &facets {
          tx.execute(
            "INSERT OR IGNORE INTO record_facets (uri, type, value)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![uri_str, kind, value],
          )?;
        }

        let stored: String = tx.query_row(
          "SELECT indexed_at FROM records WHERE uri = ?1",
          rusqlite::params![uri_str],
          |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(stored)
      })
      .await?;

    record.indexed_at = decode_ts(&stored_indexed_at)?;
    Ok(record)
  }

  async fn delete_record(&self, uri: &RecordUri) -> Result<bool> {
    let uri_str = uri.to_string();

    let deleted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM record_kv WHERE uri = ?1",
          rusqlite::params![uri_str],
        )?;
        // Facet rows cascade via the foreign key.
        let n = tx.execute(
          "DELETE FROM records WHERE uri = ?1",
          rusqlite::params![uri_str],
        )?;
        tx.commit()?;
        Ok(n > 0)
      })
      .await?;

    Ok(deleted)
  }

  async fn get_record(&self, uri: &RecordUri) -> Result<Option<Record>> {
    let uri_str = uri.to_string();

    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT uri, cid, did, collection, json, indexed_at
               FROM records WHERE uri = ?1",
              rusqlite::params![uri_str],
              |row| {
                Ok(RawRecord {
                  uri:        row.get(0)?,
                  cid:        row.get(1)?,
                  did:        row.get(2)?,
                  collection: row.get(3)?,
                  json:       row.get(4)?,
                  indexed_at: row.get(5)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRecord::into_record).transpose()
  }

  async fn list_records(
    &self,
    collection: &str,
    query: ListQuery,
  ) -> Result<Page> {
    let ListPlan { plan, order, page_limit } =
      compile_list(collection, &self.indexes, &query);
    let ord_cols = order.len();

    let Plan { sql, params } = plan;
    let mut rows: Vec<(RawRecord, Vec<String>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            let raw = RawRecord {
              uri:        row.get(0)?,
              cid:        row.get(1)?,
              did:        row.get(2)?,
              collection: row.get(3)?,
              json:       row.get(4)?,
              indexed_at: row.get(5)?,
            };
            let mut ord = Vec::with_capacity(ord_cols);
            for k in 0..ord_cols {
              let v: rusqlite::types::Value = row.get(6 + k)?;
              ord.push(sql_value_to_text(v));
            }
            Ok((raw, ord))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    // One extra row was fetched to detect a following page.
    let next_cursor = if rows.len() > page_limit {
      rows.truncate(page_limit);
      rows.last().map(|(raw, ord)| Cursor::encode(ord, &raw.cid))
    } else {
      None
    };

    let items = rows
      .into_iter()
      .map(|(raw, _)| raw.into_record())
      .collect::<Result<Vec<_>>>()?;

    Ok(Page { items, next_cursor })
  }

  async fn count_records(
    &self,
    collection: &str,
    filter: Option<Filter>,
    facet: Option<FacetFilter>,
  ) -> Result<u64> {
    let Plan { sql, params } =
      compile_count(collection, &self.indexes, filter.as_ref(), facet.as_ref());

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &sql,
          rusqlite::params_from_iter(params),
          |row| row.get(0),
        )?)
      })
      .await?;

    Ok(count as u64)
  }

  // ── Actors ────────────────────────────────────────────────────────────

  async fn ensure_actor(
    &self,
    did: &str,
    handle: Option<&str>,
  ) -> Result<Actor> {
    let did_owned = did.to_owned();
    let handle_owned = handle.map(str::to_owned);
    let now_str = encode_ts(Utc::now());

    let raw: RawActor = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO actors (did, handle, indexed_at) VALUES (?1, ?2, ?3)
           ON CONFLICT(did) DO UPDATE SET
             handle = COALESCE(excluded.handle, actors.handle)",
          rusqlite::params![did_owned, handle_owned, now_str],
        )?;

        Ok(conn.query_row(
          "SELECT did, handle, indexed_at, last_seen_notifs
           FROM actors WHERE did = ?1",
          rusqlite::params![did_owned],
          |row| {
            Ok(RawActor {
              did:              row.get(0)?,
              handle:           row.get(1)?,
              indexed_at:       row.get(2)?,
              last_seen_notifs: row.get(3)?,
            })
          },
        )?)
      })
      .await?;

    raw.into_actor()
  }

  async fn get_actor(&self, did: &str) -> Result<Option<Actor>> {
    let did_owned = did.to_owned();

    let raw: Option<RawActor> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT did, handle, indexed_at, last_seen_notifs
               FROM actors WHERE did = ?1",
              rusqlite::params![did_owned],
              |row| {
                Ok(RawActor {
                  did:              row.get(0)?,
                  handle:           row.get(1)?,
                  indexed_at:       row.get(2)?,
                  last_seen_notifs: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawActor::into_actor).transpose()
  }

  async fn set_last_seen_notifs(
    &self,
    did: &str,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let did_owned = did.to_owned();
    let at_str = encode_ts(at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE actors SET last_seen_notifs = ?2 WHERE did = ?1",
          rusqlite::params![did_owned, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(())
  }
}

// ─── LabelStore impl ─────────────────────────────────────────────────────────

impl LabelStore for SqliteStore {
  type Error = Error;

  async fn put_label(&self, label: Label) -> Result<()> {
    let cts_str = encode_ts(label.cts);
    let exp_str = label.exp.map(encode_ts);

    self
      .conn
      .call(move |conn| {
        // Timestamps are fixed-width RFC 3339, so the string comparison in
        // the guard is a chronological comparison.
        conn.execute(
          "INSERT INTO labels (src, uri, cid, val, neg, cts, exp)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT(src, uri, cid, val) DO UPDATE SET
             neg = excluded.neg,
             cts = excluded.cts,
             exp = excluded.exp
           WHERE excluded.cts >= labels.cts",
          rusqlite::params![
            label.src, label.uri, label.cid, label.val, label.neg, cts_str,
            exp_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn query_labels(&self, query: &LabelQuery) -> Result<Vec<Label>> {
    if query.subjects.is_empty() {
      return Ok(Vec::new());
    }

    let subjects = query.subjects.clone();
    let issuers = query.issuers.clone().filter(|i| !i.is_empty());

    let raws: Vec<RawLabel> = self
      .conn
      .call(move |conn| {
        let mut sql = format!(
          "SELECT src, uri, cid, val, neg, cts, exp FROM labels
           WHERE uri IN ({})",
          placeholders(subjects.len()),
        );
        let mut params: Vec<String> = subjects;
        if let Some(issuers) = issuers {
          sql.push_str(&format!(" AND src IN ({})", placeholders(issuers.len())));
          params.extend(issuers);
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RawLabel {
              src: row.get(0)?,
              uri: row.get(1)?,
              cid: row.get(2)?,
              val: row.get(3)?,
              neg: row.get(4)?,
              cts: row.get(5)?,
              exp: row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    // Latest-wins per (src, uri, val); then drop negations and expired rows.
    let mut latest: HashMap<(String, String, String), Label> = HashMap::new();
    for raw in raws {
      let label = raw.into_label()?;
      let key = (label.src.clone(), label.uri.clone(), label.val.clone());
      match latest.get(&key) {
        Some(existing) if existing.cts >= label.cts => {}
        _ => {
          latest.insert(key, label);
        }
      }
    }

    let now = Utc::now();
    let mut out: Vec<Label> =
      latest.into_values().filter(|l| l.is_active(now)).collect();
    out.sort_by(|a, b| {
      (&a.uri, &a.src, &a.val).cmp(&(&b.uri, &b.src, &b.val))
    });
    Ok(out)
  }

  async fn clear_labels(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute("DELETE FROM labels", [])?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
