//! The query AST consumed by a store's query compiler.
//!
//! Callers describe filtered, ordered, cursor-paginated reads with these
//! types instead of writing query text; the storage backend compiles them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{FacetKind, Record};

// ─── Filters ─────────────────────────────────────────────────────────────────

/// A compound filter expression: leaf conditions combined by AND/OR/NOT.
///
/// Leaf values are compared as text against whatever the field resolves to
/// (fixed column, KV index row, or raw JSON extraction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
  Equals { field: String, value: Value },
  In { field: String, values: Vec<Value> },
  Contains { field: String, value: String },
  And(Vec<Filter>),
  Or(Vec<Filter>),
  Not(Box<Filter>),
}

impl Filter {
  pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
    Filter::Equals { field: field.into(), value: value.into() }
  }

  pub fn within<I, V>(field: impl Into<String>, values: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    Filter::In {
      field:  field.into(),
      values: values.into_iter().map(Into::into).collect(),
    }
  }

  pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
    Filter::Contains { field: field.into(), value: value.into() }
  }

  pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
    Filter::And(filters.into_iter().collect())
  }

  pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
    Filter::Or(filters.into_iter().collect())
  }

  #[allow(clippy::should_implement_trait)]
  pub fn not(filter: Filter) -> Self { Filter::Not(Box::new(filter)) }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  #[default]
  Asc,
  Desc,
}

/// One ordering key. The full sort is an ordered list of these; the record
/// cid is always appended by the compiler as a final ascending tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
  pub field:     String,
  pub direction: Direction,
}

impl SortKey {
  pub fn asc(field: impl Into<String>) -> Self {
    Self { field: field.into(), direction: Direction::Asc }
  }

  pub fn desc(field: impl Into<String>) -> Self {
    Self { field: field.into(), direction: Direction::Desc }
  }
}

// ─── Facet filter ────────────────────────────────────────────────────────────

/// Restrict results to records whose facet index contains `(kind, value)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetFilter {
  pub kind:  FacetKind,
  pub value: String,
}

// ─── List query / page ───────────────────────────────────────────────────────

/// A full list request over one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
  pub filter: Option<Filter>,
  /// Ordering keys; defaults to `indexedAt` ascending when empty.
  #[serde(default)]
  pub order:  Vec<SortKey>,
  /// Opaque keyset cursor from a previous page. Undecodable or mismatched
  /// cursors are ignored, never an error.
  pub cursor: Option<String>,
  pub facet:  Option<FacetFilter>,
  pub limit:  Option<u32>,
}

/// One page of results plus the cursor for the next page, if any remains.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
  pub items:       Vec<Record>,
  pub next_cursor: Option<String>,
}
