mod cache;
mod clients;
mod config;
mod http;
mod net;
mod notify;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use cache::{CacheStore, MemoryStore, SqliteStore};
use clients::ClientRegistry;
use net::HttpFetcher;
use worker::{Worker, WorkerEvent, SYNC_RATES_TAG};

#[derive(Parser, Debug)]
#[command(name = "dinar-sw")]
#[command(about = "Offline cache worker for the Change Dinar rates site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dinar-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Run a single rates sync after activation, then exit
  #[arg(long)]
  once: bool,

  /// Keep the cache in memory instead of the on-disk database
  #[arg(long)]
  ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing()?;

  if args.ephemeral {
    run_worker(config, MemoryStore::new(), args.once).await
  } else {
    run_worker(config, SqliteStore::open()?, args.once).await
  }
}

async fn run_worker<S: CacheStore>(config: config::Config, store: S, once: bool) -> Result<()> {
  let fetcher = HttpFetcher::new()?;
  let registry = Arc::new(ClientRegistry::new());
  let mut worker = Worker::new(&config, store, fetcher, Arc::clone(&registry))?;

  worker.install().await?;
  worker.activate().await?;

  if once {
    worker.handle_sync(SYNC_RATES_TAG).await;
    worker.drain_background_tasks().await;
    return Ok(());
  }

  let (tx, rx) = mpsc::unbounded_channel();

  // Periodic tick standing in for the platform's connectivity-restore
  // signal; the first sync fires immediately.
  let sync_tx = tx.clone();
  let interval = Duration::from_secs(config.sync.interval_secs.max(1));
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    loop {
      ticker.tick().await;
      let event = WorkerEvent::Sync {
        tag: SYNC_RATES_TAG.to_string(),
      };
      if sync_tx.send(event).is_err() {
        break;
      }
    }
  });

  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("shutting down");
      let _ = tx.send(WorkerEvent::Close);
    }
  });

  worker.run(rx).await;
  Ok(())
}

fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .map(|dir| dir.join("dinar-sw"))
    .unwrap_or_else(|| PathBuf::from("."));
  let file_appender = tracing_appender::rolling::daily(log_dir, "dinar-sw.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dinar_sw=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
