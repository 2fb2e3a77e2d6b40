use anyhow::{Context, Result};
use carepath_bus::LocalBus;
use carepath_hub::session::{SessionConfig, SessionController};
use carepath_store::Store;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "carepath telemetry hub")]
struct Args {
    /// Topic namespace root for request and response topics.
    #[arg(long, default_value = "carepath")]
    namespace: String,
    /// Path to the sqlite database file. Uses an in-memory database when omitted.
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// Seconds the worker waits on an empty queue before re-checking the stop flag.
    #[arg(long, default_value = "1")]
    poll_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carepath_hub=info".into()),
        )
        .init();

    let args = Args::parse();

    let store = Store::open(args.db_path.as_deref()).with_context(|| {
        format!(
            "failed to open store at {}",
            args.db_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        )
    })?;

    // The embedded bus; a broker-backed deployment swaps in its own `Bus`
    // implementation here.
    let bus = Arc::new(LocalBus::new());

    let mut session = SessionController::new(
        bus,
        store,
        SessionConfig {
            namespace: args.namespace.clone(),
            poll_interval: Duration::from_secs(args.poll_secs.max(1)),
        },
    );
    session.start();
    tracing::info!(namespace = %args.namespace, "carepath hub running, ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    session.stop().await;

    Ok(())
}
