//! Reconnecting websocket consumer for the relay commit stream.
//!
//! [`StreamIngestor::run`] owns the connection lifecycle: connect, drain
//! messages into the store, and on failure reconnect with capped exponential
//! backoff. [`StreamIngestor::disconnect`] is the only way out besides
//! exhausting the reconnect budget.

use std::{
  sync::{Arc, Mutex},
  time::Duration,
};

use futures::StreamExt;
use tokio::{net::TcpStream, sync::watch};
use tokio_tungstenite::{
  MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use weir_core::{record::RecordUri, store::RecordStore};

use crate::{
  error::{IngestError, Result},
  event::{CommitOp, EventKind, StreamEvent},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct StreamConfig {
  /// Websocket endpoint, e.g. `wss://relay.example/subscribe`.
  pub endpoint:               String,
  /// Collections to subscribe to. Also gates event application, since the
  /// relay may send more than we asked for.
  pub collections:            Vec<String>,
  pub reconnect_base:         Duration,
  pub reconnect_cap:          Duration,
  pub max_reconnect_attempts: u32,
}

impl StreamConfig {
  pub fn new(endpoint: impl Into<String>, collections: Vec<String>) -> Self {
    StreamConfig {
      endpoint: endpoint.into(),
      collections,
      reconnect_base: Duration::from_secs(1),
      reconnect_cap: Duration::from_secs(30),
      max_reconnect_attempts: 8,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
  Disconnected,
  Connecting,
  Connected,
  Reconnecting,
  Closed,
}

/// What applying one event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
  Indexed,
  Deleted,
  ActorSeen,
  Skipped,
}

/// Replay a single stream event through the store.
///
/// Commits for collections outside `wanted` are skipped. Create and update
/// are the same operation from the store's point of view.
pub async fn apply_event<S>(
  store: &S,
  wanted: &[String],
  event: &StreamEvent,
) -> Result<Applied>
where
  S: RecordStore,
{
  match event.kind {
    EventKind::Identity => {
      let handle = event
        .identity
        .as_ref()
        .and_then(|i| i.handle.as_deref());
      store
        .ensure_actor(&event.did, handle)
        .await
        .map_err(IngestError::store)?;
      Ok(Applied::ActorSeen)
    }
    EventKind::Account => Ok(Applied::Skipped),
    EventKind::Commit => {
      let commit = event.commit.as_ref().ok_or_else(|| {
        IngestError::MalformedEvent("commit event without commit payload".into())
      })?;
      if !wanted.iter().any(|c| c == &commit.collection) {
        return Ok(Applied::Skipped);
      }
      let uri = RecordUri::new(
        event.did.clone(),
        commit.collection.clone(),
        commit.rkey.clone(),
      );
      match commit.operation {
        CommitOp::Create | CommitOp::Update => {
          let cid = commit.cid.as_deref().ok_or_else(|| {
            IngestError::MalformedEvent("commit without cid".into())
          })?;
          let record = commit.record.clone().ok_or_else(|| {
            IngestError::MalformedEvent("commit without record body".into())
          })?;
          store
            .ensure_actor(&event.did, None)
            .await
            .map_err(IngestError::store)?;
          store
            .put_record(&uri, cid, record)
            .await
            .map_err(IngestError::store)?;
          Ok(Applied::Indexed)
        }
        CommitOp::Delete => {
          store.delete_record(&uri).await.map_err(IngestError::store)?;
          Ok(Applied::Deleted)
        }
      }
    }
  }
}

pub struct StreamIngestor<S> {
  store:       Arc<S>,
  config:      StreamConfig,
  state:       Mutex<ConnState>,
  shutdown_tx: watch::Sender<bool>,
  shutdown_rx: watch::Receiver<bool>,
}

impl<S> StreamIngestor<S>
where
  S: RecordStore,
{
  pub fn new(store: Arc<S>, config: StreamConfig) -> Self {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    StreamIngestor {
      store,
      config,
      state: Mutex::new(ConnState::Disconnected),
      shutdown_tx,
      shutdown_rx,
    }
  }

  pub fn state(&self) -> ConnState { *self.state.lock().unwrap() }

  fn set_state(&self, next: ConnState) { *self.state.lock().unwrap() = next; }

  fn closing(&self) -> bool { *self.shutdown_rx.borrow() }

  /// Request shutdown. Idempotent; `run` notices at its next await point,
  /// including mid-backoff.
  pub fn disconnect(&self) {
    let _ = self.shutdown_tx.send(true);
    self.set_state(ConnState::Closed);
  }

  /// Backoff before reconnect attempt `attempt` (1-based):
  /// `base * 2^(attempt - 1)`, capped.
  pub fn reconnect_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << shift).min(cap)
  }

  fn subscribe_url(&self) -> String {
    if self.config.collections.is_empty() {
      self.config.endpoint.clone()
    } else {
      format!(
        "{}?wantedCollections={}",
        self.config.endpoint,
        self.config.collections.join(",")
      )
    }
  }

  /// Drive the connection until shutdown or reconnect exhaustion. A
  /// successful connection resets the attempt counter.
  pub async fn run(&self) -> Result<()> {
    let mut attempt: u32 = 0;
    let url = self.subscribe_url();
    loop {
      if self.closing() {
        self.set_state(ConnState::Closed);
        return Ok(());
      }
      self.set_state(ConnState::Connecting);
      let connected = tokio::select! {
        _ = wait_shutdown(self.shutdown_rx.clone()) => {
          self.set_state(ConnState::Closed);
          return Ok(());
        }
        res = connect_async(url.as_str()) => res,
      };
      match connected {
        Ok((ws, _response)) => {
          tracing::info!(url = %url, "commit stream connected");
          attempt = 0;
          self.set_state(ConnState::Connected);
          self.read_loop(ws).await;
          if self.closing() {
            self.set_state(ConnState::Closed);
            return Ok(());
          }
          tracing::warn!("commit stream closed unexpectedly");
        }
        Err(e) => {
          tracing::warn!(error = %e, url = %url, "commit stream connect failed");
        }
      }
      attempt += 1;
      if attempt > self.config.max_reconnect_attempts {
        self.set_state(ConnState::Disconnected);
        return Err(IngestError::ReconnectExhausted { attempts: attempt - 1 });
      }
      let delay = Self::reconnect_delay(
        attempt,
        self.config.reconnect_base,
        self.config.reconnect_cap,
      );
      self.set_state(ConnState::Reconnecting);
      tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "stream reconnect scheduled");
      tokio::select! {
        _ = wait_shutdown(self.shutdown_rx.clone()) => {
          self.set_state(ConnState::Closed);
          return Ok(());
        }
        _ = tokio::time::sleep(delay) => {}
      }
    }
  }

  async fn read_loop(&self, mut ws: WsStream) {
    loop {
      let msg = tokio::select! {
        _ = wait_shutdown(self.shutdown_rx.clone()) => {
          let _ = ws.close(None).await;
          return;
        }
        msg = ws.next() => msg,
      };
      match msg {
        Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
        Some(Ok(Message::Close(_))) | None => return,
        // tungstenite answers pings itself; binary frames are not part of
        // the protocol
        Some(Ok(_)) => {}
        Some(Err(e)) => {
          tracing::warn!(error = %e, "stream read error");
          return;
        }
      }
    }
  }

  async fn handle_text(&self, text: &str) {
    let event: StreamEvent = match serde_json::from_str(text) {
      Ok(event) => event,
      Err(e) => {
        tracing::warn!(error = %e, "dropping malformed stream event");
        return;
      }
    };
    match apply_event(self.store.as_ref(), &self.config.collections, &event).await {
      Ok(Applied::Indexed) => {
        tracing::debug!(did = %event.did, "indexed record from stream")
      }
      Ok(_) => {}
      Err(e) => tracing::warn!(error = %e, did = %event.did, "failed to apply stream event"),
    }
  }
}

/// Resolves once shutdown has been requested.
async fn wait_shutdown(mut rx: watch::Receiver<bool>) {
  while !*rx.borrow() {
    if rx.changed().await.is_err() {
      return;
    }
  }
}
