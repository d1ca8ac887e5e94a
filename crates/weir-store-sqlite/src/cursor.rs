//! Keyset-pagination cursor encoding.
//!
//! A cursor is the base64 of the current ordering-key values, pipe-joined,
//! with the last row's cid as the final field. The cid is the total-order
//! tie-breaker, so a cursor always has `order.len() + 1` fields.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Cursor {
  /// Ordering-key values of the last row of the previous page, in sort-key
  /// order.
  pub values: Vec<String>,
  /// cid of that row.
  pub cid:    String,
}

impl Cursor {
  pub fn encode(values: &[String], cid: &str) -> String {
    let mut parts: Vec<&str> = values.iter().map(String::as_str).collect();
    parts.push(cid);
    B64.encode(parts.join("|"))
  }

  /// Decode a cursor expecting `expected` ordering fields. Returns `None` on
  /// any decode failure or field-count mismatch — malformed pagination state
  /// is treated as "no cursor", never as an error.
  pub fn decode(raw: &str, expected: usize) -> Option<Self> {
    let bytes = B64.decode(raw).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let mut parts: Vec<String> = text.split('|').map(str::to_string).collect();
    if parts.len() != expected + 1 {
      return None;
    }
    let cid = parts.pop()?;
    Some(Self { values: parts, cid })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip() {
    let raw = Cursor::encode(&["2024-01-01".into(), "hi".into()], "bafy123");
    let cur = Cursor::decode(&raw, 2).unwrap();
    assert_eq!(cur.values, vec!["2024-01-01".to_string(), "hi".to_string()]);
    assert_eq!(cur.cid, "bafy123");
  }

  #[test]
  fn field_count_mismatch_is_none() {
    let raw = Cursor::encode(&["a".into()], "cid");
    assert!(Cursor::decode(&raw, 2).is_none());
  }

  #[test]
  fn garbage_is_none() {
    assert!(Cursor::decode("!!! not base64 !!!", 1).is_none());
    // valid base64, but of non-utf8 bytes
    let raw = B64.encode([0xff, 0xfe, 0xff]);
    assert!(Cursor::decode(&raw, 0).is_none());
  }
}
