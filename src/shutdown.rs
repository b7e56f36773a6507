use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `token` on Ctrl+C or SIGTERM.
///
/// The returned task ends once the token is cancelled, whichever side did it.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => info!("Received Ctrl+C signal"),
            _ = wait_for_term_signal() => info!("Received TERM signal"),
            _ = token.cancelled() => return,
        }
        info!("Stopping ...");
        token.cancel();
    })
}

/// Wait for TERM signal (Unix only)
#[cfg(unix)]
async fn wait_for_term_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => futures::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_term_signal() {
    // On non-Unix systems, just wait indefinitely
    futures::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let listener = cancel_on_signal(token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener should stop")
            .unwrap();
    }
}
