use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use promptd::config::ServiceConfig;
use promptd::device::NullDevice;
use promptd::executor::DryRunExecutor;
use promptd::progress::CancelToken;
use promptd::queue::PromptQueue;
use promptd::server::{self, AppState, Session};
use promptd::worker::{self, PromptWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env();

    eprintln!("promptd v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   HTTP:  http://{}:{}", config.listen, config.port);
    eprintln!("   WS:    ws://{}:{}/ws", config.listen, config.port);
    eprintln!(
        "   Reclaim interval: {:.0}s\n",
        config.worker.reclaim_interval.as_secs_f64()
    );

    let queue = PromptQueue::new();
    let session = Arc::new(Mutex::new(Session::default()));
    let cancel = CancelToken::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity);

    // Dedicated worker thread — blocking execution never touches the event
    // loop. The dry-run engine stands in until a real one is wired up.
    let prompt_worker = PromptWorker::new(
        Arc::clone(&queue),
        Box::new(DryRunExecutor::new()),
        Arc::new(NullDevice),
        events_tx.clone(),
        Arc::clone(&session),
        cancel.clone(),
        &config.worker,
    );
    worker::spawn(prompt_worker)?;

    tokio::spawn(server::publish_loop(events_rx, broadcast_tx.clone()));

    let state = AppState {
        queue,
        events: events_tx,
        broadcast: broadcast_tx,
        session,
        cancel,
    };
    let app = server::app(state);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.listen, config.port)).await?;
    info!(port = config.port, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopped server");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
