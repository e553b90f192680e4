use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use console::Term;
use tokio::sync::Notify;

/// Global shutdown flag for graceful termination.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

static SHUTDOWN_NOTIFY: OnceLock<Notify> = OnceLock::new();

fn notify() -> &'static Notify {
    SHUTDOWN_NOTIFY.get_or_init(Notify::new)
}

/// Check if shutdown has been requested.
#[inline]
pub(crate) fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Acquire)
}

fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
    notify().notify_waiters();
}

/// Resolve once Ctrl+C has been pressed.
pub(crate) async fn shutdown_requested() {
    let notified = notify().notified();
    tokio::pin!(notified);
    notified.as_mut().enable();
    if is_shutdown_requested() {
        return;
    }
    notified.await;
}

/// Set up the Ctrl+C handler for graceful shutdown.
pub(crate) fn setup_shutdown_handler() {
    tokio::spawn(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, waiting for running syncs...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, waiting for running syncs");
        }

        request_shutdown();

        // Second Ctrl+C forces quit
        if tokio::signal::ctrl_c().await.is_ok() {
            if is_tty {
                eprintln!("Force quit!");
            }
            std::process::exit(130);
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn shutdown_requested_resolves_after_request() {
        let waiter = tokio::spawn(shutdown_requested());
        tokio::task::yield_now().await;

        request_shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter should not panic");
        assert!(is_shutdown_requested());

        // Already requested: resolves immediately
        tokio::time::timeout(Duration::from_secs(1), shutdown_requested())
            .await
            .expect("should resolve immediately");
    }
}
