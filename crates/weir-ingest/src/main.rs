//! weir daemon binary.
//!
//! Reads `weir.toml` (or the path specified with `--config`), opens the
//! SQLite mirror, kicks off an initial backfill when one is configured, and
//! then follows the relay commit stream until interrupted.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use weir_ingest::{
  backfill::{BackfillClient, BackfillReconciler},
  config::MirrorConfig,
  stream::StreamIngestor,
};
use weir_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "weir record mirror daemon")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "weir.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("WEIR").separator("__"))
    .build()
    .context("failed to read config file")?;

  let mirror_cfg: MirrorConfig = settings
    .try_deserialize()
    .context("failed to deserialise MirrorConfig")?;

  let wanted = mirror_cfg.wanted_collections();
  if wanted.is_empty() {
    tracing::warn!("no collections configured, the stream will index nothing");
  }

  // Open SQLite store.
  let store_path = expand_tilde(&mirror_cfg.store_path);
  let store = SqliteStore::open(&store_path, mirror_cfg.collections.clone())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  // Initial backfill runs alongside the stream; both go through the same
  // upsert path, so overlap is harmless.
  if let Some(backfill) = &mirror_cfg.backfill
    && !backfill.repos.is_empty()
  {
    let client = BackfillClient::new(&backfill.origin)
      .context("failed to build backfill client")?;
    let reconciler = BackfillReconciler::new(store.clone(), client);
    let repos = backfill.repos.clone();
    let collections = wanted.clone();
    tokio::spawn(async move {
      let summary = reconciler.reconcile(&repos, &collections).await;
      tracing::info!(
        fetched = summary.fetched,
        indexed = summary.indexed,
        failed = summary.failed,
        "initial backfill complete"
      );
    });
  }

  let ingestor = Arc::new(StreamIngestor::new(
    store,
    mirror_cfg.stream.stream_config(wanted),
  ));

  {
    let ingestor = ingestor.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupt received, shutting down");
        ingestor.disconnect();
      }
    });
  }

  ingestor.run().await.context("commit stream failed")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
