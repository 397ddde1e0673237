//! Signal handling for graceful shutdown.

use tracing::{info, warn};

/// Wait for a shutdown signal (SIGINT, SIGTERM, or SIGQUIT on Unix).
///
/// A signal whose handler cannot be installed is logged and never fires;
/// the remaining signals still resolve the future.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    async fn wait_for(kind: SignalKind, name: &'static str) -> &'static str {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
                name
            }
            Err(e) => {
                warn!(signal = name, error = %e, "Failed to install signal handler");
                std::future::pending().await
            }
        }
    }

    let received = tokio::select! {
        name = wait_for(SignalKind::interrupt(), "SIGINT") => name,
        name = wait_for(SignalKind::terminate(), "SIGTERM") => name,
        name = wait_for(SignalKind::quit(), "SIGQUIT") => name,
    };

    info!(message = "Signal received.", signal = received);
}

/// Wait for Ctrl-C on platforms without Unix signals.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!(message = "Signal received.", signal = "ctrl-c");
}
