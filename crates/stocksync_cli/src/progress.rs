//! Progress reporting for sync runs.

mod logging;

use std::sync::Arc;

use stocksync::sync::{ProgressCallback, SyncProgress};

use self::logging::LoggingReporter;

/// Build a progress callback that renders events as tracing output.
pub fn progress_callback() -> ProgressCallback {
    let reporter = Arc::new(LoggingReporter::new());
    Arc::new(move |event: SyncProgress| reporter.handle(event))
}
