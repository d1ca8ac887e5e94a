//! Daemon configuration, loaded from a TOML file plus `WEIR_*` environment
//! overrides.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use weir_core::collection::CollectionIndexes;

use crate::stream::StreamConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
  /// SQLite database path.
  pub store_path:  PathBuf,
  /// Collection NSID → hot fields to maintain in the KV index.
  #[serde(default)]
  pub collections: CollectionIndexes,
  pub stream:      StreamSettings,
  #[serde(default)]
  pub backfill:    Option<BackfillSettings>,
}

impl MirrorConfig {
  /// Configured collections, sorted for stable subscription URLs.
  pub fn wanted_collections(&self) -> Vec<String> {
    let mut wanted: Vec<String> =
      self.collections.collections().map(str::to_owned).collect();
    wanted.sort();
    wanted
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
  pub endpoint:               String,
  #[serde(default = "default_reconnect_base_ms")]
  pub reconnect_base_ms:      u64,
  #[serde(default = "default_reconnect_cap_ms")]
  pub reconnect_cap_ms:       u64,
  #[serde(default = "default_max_reconnect_attempts")]
  pub max_reconnect_attempts: u32,
}

impl StreamSettings {
  pub fn stream_config(&self, collections: Vec<String>) -> StreamConfig {
    let mut config = StreamConfig::new(self.endpoint.clone(), collections);
    config.reconnect_base = Duration::from_millis(self.reconnect_base_ms);
    config.reconnect_cap = Duration::from_millis(self.reconnect_cap_ms);
    config.max_reconnect_attempts = self.max_reconnect_attempts;
    config
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillSettings {
  /// Origin host serving `com.atproto.repo.listRecords`.
  pub origin: String,
  /// Repositories to reconcile on startup.
  #[serde(default)]
  pub repos:  Vec<String>,
}

fn default_reconnect_base_ms() -> u64 { 1_000 }

fn default_reconnect_cap_ms() -> u64 { 30_000 }

fn default_max_reconnect_attempts() -> u32 { 8 }
