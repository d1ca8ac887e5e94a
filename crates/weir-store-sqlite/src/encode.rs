//! Encoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps use fixed-width RFC 3339 UTC (microsecond precision, `Z`
//! suffix) so that lexicographic order equals chronological order — the
//! label monotonic-cts guard and keyset cursors both compare them as text.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

// ─── Timestamps ──────────────────────────────────────────────────────────────

pub fn encode_ts(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_ts(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Filter / index values ───────────────────────────────────────────────────

/// Text form of a JSON value as stored in KV rows and compared in filters.
///
/// Scalars render bare (no quotes); null renders empty; arrays and objects
/// fall back to compact JSON.
pub fn value_to_text(v: &serde_json::Value) -> String {
  match v {
    serde_json::Value::Null => String::new(),
    serde_json::Value::Bool(b) => b.to_string(),
    serde_json::Value::Number(n) => n.to_string(),
    serde_json::Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Text form of a raw SQLite value, used when building the next-page cursor
/// from a row's ordering-key columns.
pub fn sql_value_to_text(v: rusqlite::types::Value) -> String {
  use rusqlite::types::Value as V;
  match v {
    V::Null => String::new(),
    V::Integer(i) => i.to_string(),
    V::Real(f) => f.to_string(),
    V::Text(s) => s,
    V::Blob(_) => String::new(),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `records` row.
pub struct RawRecord {
  pub uri:        String,
  pub cid:        String,
  pub did:        String,
  pub collection: String,
  pub json:       String,
  pub indexed_at: String,
}

impl RawRecord {
  pub fn into_record(self) -> Result<weir_core::record::Record> {
    Ok(weir_core::record::Record {
      uri:        self.uri,
      cid:        self.cid,
      did:        self.did,
      collection: self.collection,
      json:       serde_json::from_str(&self.json)?,
      indexed_at: decode_ts(&self.indexed_at)?,
    })
  }
}

/// Raw strings read directly from an `actors` row.
pub struct RawActor {
  pub did:              String,
  pub handle:           Option<String>,
  pub indexed_at:       String,
  pub last_seen_notifs: Option<String>,
}

impl RawActor {
  pub fn into_actor(self) -> Result<weir_core::record::Actor> {
    Ok(weir_core::record::Actor {
      did:              self.did,
      handle:           self.handle,
      indexed_at:       decode_ts(&self.indexed_at)?,
      last_seen_notifs: self
        .last_seen_notifs
        .as_deref()
        .map(decode_ts)
        .transpose()?,
    })
  }
}

/// Raw strings read directly from a `labels` row.
pub struct RawLabel {
  pub src: String,
  pub uri: String,
  pub cid: String,
  pub val: String,
  pub neg: bool,
  pub cts: String,
  pub exp: Option<String>,
}

impl RawLabel {
  pub fn into_label(self) -> Result<weir_core::label::Label> {
    Ok(weir_core::label::Label {
      src: self.src,
      uri: self.uri,
      cid: self.cid,
      val: self.val,
      neg: self.neg,
      cts: decode_ts(&self.cts)?,
      exp: self.exp.as_deref().map(decode_ts).transpose()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_are_fixed_width_and_ordered() {
    let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let late = early + chrono::Duration::milliseconds(500);
    let later = early + chrono::Duration::seconds(1);

    let (a, b, c) = (encode_ts(early), encode_ts(late), encode_ts(later));
    assert_eq!(a.len(), b.len());
    assert_eq!(b.len(), c.len());
    assert!(a < b && b < c);

    assert_eq!(decode_ts(&b).unwrap(), late);
  }

  #[test]
  fn value_to_text_scalars() {
    use serde_json::json;
    assert_eq!(value_to_text(&json!("hi")), "hi");
    assert_eq!(value_to_text(&json!(42)), "42");
    assert_eq!(value_to_text(&json!(true)), "true");
    assert_eq!(value_to_text(&json!(null)), "");
    assert_eq!(value_to_text(&json!([1, 2])), "[1,2]");
  }
}
