//! OS signal handling.
//!
//! On Unix, SIGINT, SIGTERM and SIGQUIT all request shutdown; elsewhere only
//! Ctrl-C does. The signal is turned into cancellation of the process-wide
//! token, which is the only way the supervisor is ever stopped.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Completes when the process receives a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigquit.recv() => info!("received SIGQUIT"),
    }
    Ok(())
}

/// Completes when the process receives a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Cancels `token` on the first termination signal.
///
/// If signal handlers cannot be installed the token is cancelled immediately.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            signal = wait_for_shutdown_signal() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to install signal handlers");
                }
                info!("shutdown requested");
                token.cancel();
            }
        }
    })
}
