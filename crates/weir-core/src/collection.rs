//! Per-collection hot-field configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Maps a collection NSID to the list of record fields that get rows in the
/// secondary KV index.
///
/// Passed into stores at construction; query compilation consults it to pick
/// between a direct column read, an index join, and raw JSON extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionIndexes {
  map: HashMap<String, Vec<String>>,
}

impl CollectionIndexes {
  pub fn new() -> Self { Self::default() }

  /// Builder-style helper, mostly for tests and embedded setups.
  pub fn with<I, S>(mut self, collection: impl Into<String>, fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.insert(collection, fields.into_iter().map(Into::into).collect());
    self
  }

  pub fn insert(&mut self, collection: impl Into<String>, fields: Vec<String>) {
    self.map.insert(collection.into(), fields);
  }

  /// Indexed field names for `collection`; empty when unconfigured.
  pub fn fields_for(&self, collection: &str) -> &[String] {
    self.map.get(collection).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn is_indexed(&self, collection: &str, field: &str) -> bool {
    self.fields_for(collection).iter().any(|f| f == field)
  }

  pub fn collections(&self) -> impl Iterator<Item = &str> {
    self.map.keys().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fields_for_unconfigured_collection_is_empty() {
    let idx = CollectionIndexes::new().with("app.test.post", ["title"]);
    assert_eq!(idx.fields_for("app.test.post"), ["title".to_string()]);
    assert!(idx.fields_for("app.test.other").is_empty());
    assert!(idx.is_indexed("app.test.post", "title"));
    assert!(!idx.is_indexed("app.test.post", "body"));
  }
}
