//! Error type for `weir-ingest`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
  #[error("websocket error: {0}")]
  WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("backfill origin returned status {status} for {did}/{collection}")]
  BackfillStatus {
    status:     u16,
    did:        String,
    collection: String,
  },

  #[error("malformed event: {0}")]
  MalformedEvent(String),

  #[error("core error: {0}")]
  Core(#[from] weir_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("gave up reconnecting after {attempts} attempts")]
  ReconnectExhausted { attempts: u32 },
}

impl IngestError {
  /// Wrap a backend-specific store error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    IngestError::Store(Box::new(e))
  }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
