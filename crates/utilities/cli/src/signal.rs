//! Process signal handling.

use blockloader::Shutter;
use tokio::task::JoinHandle;

/// Resolves on `SIGINT`, or on `SIGTERM` on unix platforms.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "signal", %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(target: "signal", %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Shuts `shutter` down cleanly when the process receives a termination signal.
///
/// The returned task ends on the signal, or as soon as the shutter terminates on its own.
pub fn shutdown_on_signal(shutter: Shutter) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = shutter.terminating() => {}
            _ = shutdown_signal() => {
                tracing::info!(target: "signal", "Received shutdown signal");
                shutter.shutdown(None);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_ends_with_shutter() {
        let shutter = Shutter::new("test");
        let handle = shutdown_on_signal(shutter.clone());

        shutter.shutdown(None);

        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(shutter.cause(), None);
    }
}
