//! Wire types for the real-time commit stream.
//!
//! The relay emits one JSON object per message. Commit events carry the
//! operation, collection, record key, content hash, and (for create/update)
//! the record body; identity events announce handle changes.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
  Commit,
  Identity,
  Account,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOp {
  Create,
  Update,
  Delete,
}

/// One inbound stream message.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
  pub did:      String,
  /// Relay-assigned event time in microseconds since the epoch.
  pub time_us:  u64,
  pub kind:     EventKind,
  #[serde(default)]
  pub commit:   Option<CommitData>,
  #[serde(default)]
  pub identity: Option<IdentityData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitData {
  pub operation:  CommitOp,
  pub collection: String,
  pub rkey:       String,
  /// Absent on deletes.
  #[serde(default)]
  pub cid:        Option<String>,
  /// Absent on deletes.
  #[serde(default)]
  pub record:     Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityData {
  #[serde(default)]
  pub handle: Option<String>,
}
