//! Bridge proxy entry point.
//!
//! Startup order is grounded on `slab-server/src/main.rs`: load config,
//! build the tracing subscriber, construct shared state, spawn the TTL
//! sweep, build the router, and serve with graceful shutdown.

mod backend;
mod config;
mod error;
mod middleware;
mod relay;
mod routes;
mod schemas;
mod session;
mod state;
mod store;
mod upload;
mod workflow;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use config::Config;
use state::AppState;

/// Thin CLI overlay: everything is configurable via environment variables
/// (spec §6), these flags just save re-exporting env vars in local dev.
#[derive(Debug, Parser)]
#[command(name = "bridge-server", about = "Bridge proxy fronting a pool of ComfyUI-style generation backends")]
struct Cli {
    /// Overrides HOST:PORT (e.g. `0.0.0.0:8288`).
    #[arg(long)]
    bind: Option<String>,

    /// Overrides LOGGING_LEVEL.
    #[arg(long)]
    log_level: Option<String>,
}

/// Build the tracing subscriber. When `log_dir` is configured, logs go to
/// a daily-rotated file via `tracing-appender`'s non-blocking writer in
/// addition to stdout; the returned guard must be held for the process
/// lifetime or buffered lines on the background writer thread are lost.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| {
        eprintln!("invalid LOGGING_LEVEL '{}', falling back to 'info'", config.log_level);
        EnvFilter::new("info")
    });

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bridge-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let subscriber = fmt().with_env_filter(filter).with_writer(writer);
            if config.log_json {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
            Some(guard)
        }
        None => {
            let subscriber = fmt().with_env_filter(filter);
            if config.log_json {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }

    let _tracing_guard = init_tracing(&config);

    let state = AppState::build(config).await?;

    let sweep_handle = tokio::spawn(Arc::clone(&state.sessions).run_sweep());

    let router = routes::build(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&state.config.bind_address).await?;
    tracing::info!(address = %state.config.bind_address, "bridge-server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep_handle.abort();
    Ok(())
}
