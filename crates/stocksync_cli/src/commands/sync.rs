use serde::Serialize;
use stocksync::sync::PerformanceMetrics;
use stocksync::{Marketplace, SyncOptions, SyncResult, SyncStatus, TaskPriority, TaskStatus};
use tabled::Tabled;

use crate::commands::shared::{
    OutputFormat, format_duration_ms, or_dash, print_json, print_table, start_service,
    unique_sources,
};
use crate::config::Config;
use crate::shutdown;

/// One row of the run summary.
#[derive(Debug, Clone, Serialize, Tabled)]
pub(crate) struct SyncResultRow {
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Processed")]
    pub processed: u64,
    #[tabled(rename = "Inserted")]
    pub inserted: u64,
    #[tabled(rename = "Updated")]
    pub updated: u64,
    #[tabled(rename = "Failed")]
    pub failed: u64,
    #[tabled(rename = "Requests")]
    pub requests: u32,
    #[tabled(rename = "Duration")]
    pub duration: String,
    #[tabled(rename = "Error")]
    pub error: String,
}

impl From<&SyncResult> for SyncResultRow {
    fn from(result: &SyncResult) -> Self {
        let status = match result.status {
            SyncStatus::Success => console::style(result.status.as_str()).green(),
            SyncStatus::Failed => console::style(result.status.as_str()).red(),
            SyncStatus::Partial | SyncStatus::Fallback => {
                console::style(result.status.as_str()).yellow()
            }
        };
        Self {
            source: result.source.to_string(),
            status: status.to_string(),
            processed: result.records_processed,
            inserted: result.records_inserted,
            updated: result.records_updated,
            failed: result.records_failed,
            requests: result.api_requests_count,
            duration: format_duration_ms(result.duration_ms()),
            error: or_dash(result.error_message.as_deref()),
        }
    }
}

#[derive(Serialize)]
struct SyncSummary<'a> {
    results: &'a [SyncResult],
    interrupted: bool,
    metrics: PerformanceMetrics,
}

/// Queue one sync per source, wait for all of them and print a summary.
pub(crate) async fn handle_sync(
    config: &Config,
    database_url: &str,
    sources: Vec<Marketplace>,
    priority: TaskPriority,
    allow_fallback: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let sources = unique_sources(sources);
    let db = stocksync::connect_and_migrate(database_url).await?;
    let service = start_service(config, db, &sources).await?;

    let options = SyncOptions {
        allow_fallback,
        ..Default::default()
    };
    let task_ids: Vec<_> = sources
        .iter()
        .map(|&source| service.run_sync_with(source, priority, options.clone()))
        .collect();

    let wait_all = async {
        let mut results = Vec::with_capacity(task_ids.len());
        for &task_id in &task_ids {
            if let Some(result) = service.wait_for(task_id).await {
                results.push(result);
            }
        }
        results
    };

    let finished = tokio::select! {
        results = wait_all => Some(results),
        _ = shutdown::shutdown_requested() => None,
    };
    let interrupted = finished.is_none();

    // Shutdown settles anything still queued or running
    service.shutdown().await;

    let results = finished.unwrap_or_else(|| {
        task_ids
            .iter()
            .filter_map(|&task_id| match service.get_result(task_id) {
                TaskStatus::Completed(result) => Some(result),
                _ => None,
            })
            .collect()
    });

    match format {
        OutputFormat::Table => {
            print_table(results.iter().map(SyncResultRow::from).collect());
            let metrics = service.metrics();
            println!(
                "{} records in {} | {} retries | {} fallback",
                metrics.records_processed,
                format_duration_ms(metrics.uptime_secs as i64 * 1_000),
                metrics.tasks_retried,
                metrics.tasks_fallback,
            );
        }
        OutputFormat::Json => {
            print_json(&SyncSummary {
                results: &results,
                interrupted,
                metrics: service.metrics(),
            })?;
        }
    }

    if interrupted {
        return Err("Sync interrupted".into());
    }
    let failed = results
        .iter()
        .filter(|r| r.status == SyncStatus::Failed)
        .count();
    if failed > 0 {
        return Err(format!("{} of {} syncs failed", failed, results.len()).into());
    }

    Ok(())
}
