//! OS signal handling.

use tokio_util::sync::CancellationToken;

/// Cancel the process-wide token when an interrupt arrives.
///
/// The task also exits if something else cancels the token first, so it
/// never outlives an orderly shutdown.
pub fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    tracing::error!(%error, "could not listen for interrupt signal");
                } else {
                    tracing::info!("interrupt received, shutting down");
                }
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });
}
