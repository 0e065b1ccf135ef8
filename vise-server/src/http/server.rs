//! TCP listener and accept loop
//!
//! Accepted sockets each get their own [`Connection`] task; connections run
//! concurrently across the runtime's worker threads, while each individual
//! connection is strictly sequential.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::Result;

use super::connection::Connection;
use super::routes::ServerContext;

/// Bind the listening socket.
pub async fn bind(addr: &str, port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind((addr, port)).await?;
    info!(
        "server waiting for connections at {}",
        listener.local_addr()?
    );
    Ok(listener)
}

/// Accept connections until the listener fails or the task is aborted.
pub async fn serve(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    let mut served: u64 = 0;
    loop {
        let (socket, peer) = listener.accept().await?;
        served += 1;
        debug!(%peer, served, "accepted connection");

        let ctx = ctx.clone();
        tokio::spawn(async move {
            Connection::new(socket, ctx).serve().await;
        });
    }
}

/// Bind and serve with graceful ctrl-c / SIGTERM shutdown.
pub async fn run(ctx: Arc<ServerContext>) -> Result<()> {
    let listener = bind(&ctx.config.bind_addr, ctx.config.port).await?;
    info!("[Press Ctrl + C to stop the server]");

    tokio::select! {
        result = serve(listener, ctx) => result,
        _ = shutdown_signal() => {
            info!("server shutting down");
            Ok(())
        }
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
