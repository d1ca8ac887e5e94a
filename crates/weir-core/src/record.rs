//! Records, actors, and facet extraction.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── RecordUri ───────────────────────────────────────────────────────────────

/// The global address of one record: `at://<did>/<collection>/<rkey>`.
///
/// The collection segment doubles as the record's schema identifier; stores
/// derive the `collection` column from the URI rather than trusting callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordUri {
  did:        String,
  collection: String,
  rkey:       String,
}

impl RecordUri {
  pub fn new(
    did: impl Into<String>,
    collection: impl Into<String>,
    rkey: impl Into<String>,
  ) -> Self {
    Self {
      did:        did.into(),
      collection: collection.into(),
      rkey:       rkey.into(),
    }
  }

  /// Parse an `at://` URI. All three segments must be non-empty.
  pub fn parse(s: &str) -> Result<Self> {
    let rest = s
      .strip_prefix("at://")
      .ok_or_else(|| Error::MalformedUri(s.to_string()))?;

    let mut parts = rest.splitn(3, '/');
    let did = parts.next().unwrap_or_default();
    let collection = parts.next().unwrap_or_default();
    let rkey = parts.next().unwrap_or_default();

    if did.is_empty() || collection.is_empty() || rkey.is_empty() || rkey.contains('/') {
      return Err(Error::MalformedUri(s.to_string()));
    }

    Ok(Self::new(did, collection, rkey))
  }

  pub fn did(&self) -> &str { &self.did }

  pub fn collection(&self) -> &str { &self.collection }

  pub fn rkey(&self) -> &str { &self.rkey }
}

impl fmt::Display for RecordUri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
  }
}

impl FromStr for RecordUri {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One indexed record revision, hydrated from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
  pub uri:        String,
  pub cid:        String,
  pub did:        String,
  pub collection: String,
  /// Canonicalized record body; always a JSON object.
  pub json:       serde_json::Value,
  /// Local ingestion watermark; refreshed when a write changes the cid,
  /// preserved when the same revision is redelivered.
  pub indexed_at: DateTime<Utc>,
}

// ─── Actor ───────────────────────────────────────────────────────────────────

/// A repository owner, created lazily the first time its identity is seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
  pub did:              String,
  pub handle:           Option<String>,
  pub indexed_at:       DateTime<Utc>,
  pub last_seen_notifs: Option<DateTime<Utc>>,
}

// ─── Facets ──────────────────────────────────────────────────────────────────

/// Kind of rich-text annotation extracted into the inverted facet index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetKind {
  Mention,
  Tag,
  Link,
}

impl FacetKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      FacetKind::Mention => "mention",
      FacetKind::Tag => "tag",
      FacetKind::Link => "link",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "mention" => Some(FacetKind::Mention),
      "tag" => Some(FacetKind::Tag),
      "link" => Some(FacetKind::Link),
      _ => None,
    }
  }
}

/// One row of the facet inverted index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Facet {
  pub kind:  FacetKind,
  pub value: String,
}

impl Facet {
  /// Extract facet rows from a record body's `facets` annotations.
  ///
  /// Each annotation carries a `features` array; a feature's `$type` suffix
  /// (after `#`) selects the kind and the field holding the value:
  /// `#mention` → `did`, `#tag` → `tag`, `#link` → `uri`. Features of any
  /// other shape are ignored.
  pub fn extract(json: &serde_json::Value) -> Vec<Facet> {
    let mut out = Vec::new();

    let Some(facets) = json.get("facets").and_then(|f| f.as_array()) else {
      return out;
    };

    for facet in facets {
      let Some(features) = facet.get("features").and_then(|f| f.as_array()) else {
        continue;
      };
      for feature in features {
        let Some(type_tag) = feature.get("$type").and_then(|t| t.as_str()) else {
          continue;
        };
        let extracted = match type_tag.rsplit('#').next() {
          Some("mention") => feature
            .get("did")
            .and_then(|v| v.as_str())
            .map(|v| (FacetKind::Mention, v)),
          Some("tag") => feature
            .get("tag")
            .and_then(|v| v.as_str())
            .map(|v| (FacetKind::Tag, v)),
          Some("link") => feature
            .get("uri")
            .and_then(|v| v.as_str())
            .map(|v| (FacetKind::Link, v)),
          _ => None,
        };
        if let Some((kind, value)) = extracted {
          out.push(Facet { kind, value: value.to_string() });
        }
      }
    }

    out
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
