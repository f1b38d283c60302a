//! Shutdown signal handling.

use tokio::signal;
use tracing::{info, warn};

/// Wait for a shutdown signal (Ctrl+C, SIGTERM, SIGINT or SIGQUIT).
///
/// Returns the name of the signal received. A handler that cannot be
/// installed never fires.
pub async fn shutdown_signal() -> String {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        "ctrl+c"
    };

    #[cfg(unix)]
    let sigterm = unix_signal(signal::unix::SignalKind::terminate(), "sigterm");
    #[cfg(unix)]
    let sigint = unix_signal(signal::unix::SignalKind::interrupt(), "sigint");
    #[cfg(unix)]
    let sigquit = unix_signal(signal::unix::SignalKind::quit(), "sigquit");

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<&str>();
    #[cfg(not(unix))]
    let sigint = std::future::pending::<&str>();
    #[cfg(not(unix))]
    let sigquit = std::future::pending::<&str>();

    let signal_name = tokio::select! {
        name = ctrl_c => name,
        name = sigterm => name,
        name = sigint => name,
        name = sigquit => name,
    };

    info!(signal = signal_name, "Received shutdown signal");
    signal_name.to_string()
}

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind, name: &'static str) -> &'static str {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(signal = name, error = %e, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
    name
}
