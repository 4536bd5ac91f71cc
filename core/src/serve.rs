//! Serving loop shared by the gateway and the tool server: stop accepting on
//! a shutdown signal, then give in-flight requests a bounded drain window.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// How a server run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stopped {
    /// Every in-flight request finished inside the grace period.
    Drained,
    /// The grace period ran out with requests still in flight.
    DeadlineElapsed,
}

/// Serves `app` until `signal` resolves, then waits at most `grace` for
/// in-flight requests.
pub async fn serve_until_drained<S>(
    listener: TcpListener,
    app: axum::Router,
    grace: Duration,
    signal: S,
) -> std::io::Result<Stopped>
where
    S: Future<Output = ()> + Send + 'static,
{
    let (stopping_tx, stopping_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signal.await;
                let _ = stopping_tx.send(());
            })
            .await
    });

    tokio::select! {
        served = server => {
            served.map_err(std::io::Error::other)??;
            Ok(Stopped::Drained)
        }
        _ = drain_deadline(stopping_rx, grace) => {
            warn!("Drain deadline of {:?} elapsed, exiting with requests in flight", grace);
            Ok(Stopped::DeadlineElapsed)
        }
    }
}

async fn drain_deadline(stopping: oneshot::Receiver<()>, grace: Duration) {
    match stopping.await {
        Ok(()) => tokio::time::sleep(grace).await,
        Err(_) => std::future::pending::<()>().await,
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining in-flight requests...");
}
