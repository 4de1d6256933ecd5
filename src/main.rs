//! Duel Arena Server - Authoritative two-player arena server
//!
//! Socket I/O runs on a tokio runtime; the match itself is driven
//! synchronously on the main thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duel_arena::app::ServerApp;
use duel_arena::config::ServerConfig;
use duel_arena::net::TcpServer;
use duel_arena::util::time::SimClock;

fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Duel Arena Server");
    info!(
        tick_length = config.tick_length,
        sub_steps = config.sub_steps,
        max_ticks = config.max_ticks,
        seed = config.seed,
        dev_mode = config.dev_mode(),
        "Match settings"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("net-io")
        .build()?;

    let transport = runtime.block_on(TcpServer::bind(config.server_addr))?;
    info!("Server listening on {}", transport.local_addr());

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    runtime.spawn(async move {
        shutdown_signal().await;
        stop_flag.store(true, Ordering::Relaxed);
    });

    let mut app = ServerApp::from_config(transport, &config);
    let clock = SimClock::new();
    let outcome = app.run(&clock, &stop);
    app.shutdown();

    match outcome? {
        Some(outcome) => info!(
            victor = ?outcome.victor,
            scores = ?outcome.scores,
            ticks = outcome.ticks,
            aborted = outcome.aborted,
            "Match over"
        ),
        None => info!("Match interrupted"),
    }

    runtime.shutdown_background();
    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping match");
        }
        _ = terminate => {
            info!("Received terminate signal, stopping match");
        }
    }
}
