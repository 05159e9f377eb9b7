use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `cancelation` once the process is interrupted. Returns early when something else
/// cancels it first.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("Interrupted, shutting down");
                cancelation.cancel();
            }
            Err(e) => {
                error!("Failed to listen for interrupts {e:?}");
                cancelation.cancelled().await;
            }
        },
        _ = cancelation.cancelled() => {},
    };
}
