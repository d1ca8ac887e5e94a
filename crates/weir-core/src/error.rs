//! Error types for `weir-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed record uri: {0:?}")]
  MalformedUri(String),

  #[error("record body is not a JSON object")]
  BodyNotObject,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
