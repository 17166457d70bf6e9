//! Provides a shutdown signal to gracefully shut down the server.
//!
//! See: [`signal`]

use std::future;

use tokio::signal;
use tracing::{error, info};

/// Resolves once the process is asked to stop, either by Ctrl + C or by `SIGTERM`.
///
/// A signal handler that fails to install is logged and never fires.
pub async fn signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl + C signal handler: {err}");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => drop(stream.recv().await),
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutting down…");
}
