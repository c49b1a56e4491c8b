mod admin;
pub mod bootstrap;
mod handler;
pub mod runtime;
mod state;

pub use handler::admit;
pub use state::AppState;

use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

/// Run the admission listener with graceful shutdown support.
///
/// When `shutdown` is notified the server stops accepting new connections and
/// waits up to `DRAIN_TIMEOUT` for in-flight requests to complete before
/// forcibly dropping them.
pub async fn run_guard_server(listen: &str, state: AppState, shutdown: Arc<Notify>) -> Result<()> {
    const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

    let stopped = shutdown.notified();
    tokio::pin!(stopped);
    stopped.as_mut().enable();

    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: guard listening, addr={}", addr);
    state.set_ready(true);

    // Atomic counter for reading active connection count (metrics crate gauges are write-only).
    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            _ = &mut stopped => {
                info!("server: guard: stop accepting new connections, draining...");
                break;
            }
            result = listener.accept() => result,
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => {
                metrics::counter!("guard_connections_total", "status" => "accepted").increment(1);
                v
            }
            Err(e) => {
                error!("server: guard: accept failed, error={}", e);
                metrics::counter!("guard_connections_total", "status" => "error").increment(1);
                continue;
            }
        };

        metrics::gauge!("guard_connections_active").increment(1.0);
        active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { handler::handle_request(req, state, peer_addr).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .http2()
                .keep_alive_interval(Some(Duration::from_secs(20)))
                .serve_connection(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: guard: connection error, peer={}, error={}", peer_addr, e);
                }
            }

            metrics::gauge!("guard_connections_active").decrement(1.0);
            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    state.set_ready(false);

    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!("server: guard: waiting for {} active connections to drain", active);
        let drain = async {
            while active_conns.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: guard: all connections drained"),
            Err(_) => info!(
                "server: guard: drain timeout ({}s), {} connections still active",
                DRAIN_TIMEOUT.as_secs(),
                active_conns.load(Ordering::Relaxed)
            ),
        }
    }

    Ok(())
}

/// Run the admin listener: health, readiness, metrics and state views.
pub async fn run_admin_server(listen: &str, state: AppState, shutdown: Arc<Notify>) -> Result<()> {
    let stopped = shutdown.notified();
    tokio::pin!(stopped);
    stopped.as_mut().enable();

    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = &mut stopped => {
                info!("server: admin: stopped");
                return Ok(());
            }
            result = listener.accept() => result?,
        };
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }
        });
    }
}
