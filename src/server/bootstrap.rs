use crate::config::GuardConfig;
use crate::metrics::Metrics;
use crate::server::{self, AppState};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
    pub admin_listen: String,
}

/// Guard lifecycle: init → build state → sweepers → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    // Phase 1: configuration and shared state.
    let config = GuardConfig::load(&args.config_path)?;
    let metrics = Metrics::install();
    let state = AppState::new(config, metrics)?;

    // Phase 2: background sweeps, all stopped by the same signal.
    let shutdown = Arc::new(Notify::new());
    let sweepers = state.start_background(&shutdown);

    // Phase 3: listeners.
    let admin_handle = tokio::spawn({
        let listen = args.admin_listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = server::run_admin_server(&listen, state, shutdown).await {
                tracing::error!("server: admin failed, error={}", e);
            }
        }
    });

    tracing::info!("server: starting guard, listen={}", args.listen);
    let guard_handle = tokio::spawn({
        let listen = args.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_guard_server(&listen, state, shutdown).await }
    });

    // Phase 4: block until signal, then wait for the drain.
    wait_for_shutdown(&shutdown).await;

    match guard_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("server: guard listener failed, error={}", e),
        Err(e) => tracing::error!("server: guard task error: {}", e),
    }
    admin_handle.abort();
    for sweeper in sweepers {
        if let Err(e) = sweeper.await {
            tracing::error!("server: sweeper task error: {}", e);
        }
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    // The writer lives for the whole process.
    std::mem::forget(guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("server: SIGTERM handler unavailable, error={}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    // Stop background sweeps and both accept loops.
    shutdown.notify_waiters();
}
