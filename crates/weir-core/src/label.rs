//! Moderation labels and label queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A moderation assertion: issuer `src` applied tag `val` to `uri`@`cid`.
///
/// For a given `(src, uri, val)` triple only the row with the maximum `cts`
/// is authoritative; stores enforce a monotonic-timestamp guard on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
  pub src: String,
  pub uri: String,
  pub cid: String,
  pub val: String,
  /// Negation: retracts an earlier assertion of the same value.
  #[serde(default)]
  pub neg: bool,
  pub cts: DateTime<Utc>,
  pub exp: Option<DateTime<Utc>>,
}

impl Label {
  /// Whether this label asserts anything at `now`: not a negation and not
  /// expired.
  pub fn is_active(&self, now: DateTime<Utc>) -> bool {
    !self.neg && self.exp.is_none_or(|exp| exp > now)
  }
}

/// Parameters for a label lookup. `subjects` must be non-empty for the query
/// to return anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelQuery {
  /// Record (or actor) URIs to fetch labels for.
  pub subjects: Vec<String>,
  /// Restrict to labels from these issuer DIDs.
  pub issuers:  Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn label(neg: bool, exp: Option<DateTime<Utc>>) -> Label {
    Label {
      src: "did:plc:mod".into(),
      uri: "at://did:plc:a/app.test.post/1".into(),
      cid: "bafy1".into(),
      val: "spam".into(),
      neg,
      cts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
      exp,
    }
  }

  #[test]
  fn active_when_not_negated_and_unexpired() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    assert!(label(false, None).is_active(now));
    assert!(label(false, Some(now + chrono::Duration::days(1))).is_active(now));
  }

  #[test]
  fn inactive_when_negated_or_expired() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    assert!(!label(true, None).is_active(now));
    assert!(!label(false, Some(now - chrono::Duration::days(1))).is_active(now));
  }
}
