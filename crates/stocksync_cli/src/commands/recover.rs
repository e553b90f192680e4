use stocksync::recovery::{CleanupReport, FailureRecoveryReport, IntegrityReport, ResyncReport};
use stocksync::{OperationStatus, RecoveryManager};

use crate::RecoverAction;
use crate::commands::shared::{
    OutputFormat, or_dash, print_fields, print_json, start_service, styled_status,
};
use crate::config::Config;

pub(crate) async fn handle_recover(
    action: RecoverAction,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = stocksync::connect_and_migrate(database_url).await?;

    let status = match action {
        RecoverAction::Resync {
            source,
            days_back,
            format,
        } => {
            // Resync rewrites what it deletes, so it needs a live client
            let service = start_service(config, db, &[source]).await?;
            let report = service.force_resync(source, days_back).await;
            output(&report, format, resync_fields)?;

            if let Some(task_id) = report.task_id {
                tracing::info!(task_id = %task_id, source = %source, "Waiting for resync");
                if let Some(result) = service.wait_for(task_id).await {
                    println!(
                        "Resync {}: {} records processed",
                        result.status, result.records_processed
                    );
                }
            }
            service.shutdown().await;
            report.status
        }
        RecoverAction::Cleanup {
            source,
            days_back,
            format,
        } => {
            let manager = RecoveryManager::new(db, config.recovery.clone());
            let report = manager.cleanup_corrupted_data(source, days_back).await;
            output(&report, format, cleanup_fields)?;
            report.status
        }
        RecoverAction::Failure {
            source,
            session_id,
            format,
        } => {
            let manager = RecoveryManager::new(db, config.recovery.clone());
            let report = manager.recover_from_failure(source, session_id).await;
            output(&report, format, failure_fields)?;
            report.status
        }
        RecoverAction::Validate { source, format } => {
            let manager = RecoveryManager::new(db, config.recovery.clone());
            let report = manager.validate_data_integrity(source).await;
            output(&report, format, integrity_fields)?;
            report.status
        }
    };

    if status.is_error() {
        return Err("Recovery operation failed".into());
    }
    Ok(())
}

fn output<T: serde::Serialize>(
    report: &T,
    format: OutputFormat,
    fields: fn(&T) -> Vec<(&'static str, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Table => print_fields(fields(report)),
        OutputFormat::Json => print_json(report)?,
    }
    Ok(())
}

fn header(
    status: OperationStatus,
    source: stocksync::Marketplace,
) -> Vec<(&'static str, String)> {
    vec![("Status", styled_status(status)), ("Source", source.to_string())]
}

fn resync_fields(r: &ResyncReport) -> Vec<(&'static str, String)> {
    let mut fields = header(r.status, r.source);
    fields.extend([
        ("Days back", r.days_back.to_string()),
        ("Records deleted", r.records_deleted.to_string()),
        ("Queued task", or_dash(r.task_id)),
        ("Message", or_dash(r.message.as_deref())),
    ]);
    fields
}

fn cleanup_fields(r: &CleanupReport) -> Vec<(&'static str, String)> {
    let mut fields = header(r.status, r.source);
    fields.extend([
        ("Days back", r.days_back.to_string()),
        ("Negative values", r.removed.negative_values.to_string()),
        ("Null keys", r.removed.null_keys.to_string()),
        ("Empty identifiers", r.removed.empty_identifiers.to_string()),
        ("Future dates", r.removed.future_dates.to_string()),
        ("Stale snapshots", r.removed.stale_snapshots.to_string()),
        ("Duplicates", r.removed.duplicates.to_string()),
        ("Total removed", r.total_removed.to_string()),
        ("Message", or_dash(r.message.as_deref())),
    ]);
    fields
}

fn failure_fields(r: &FailureRecoveryReport) -> Vec<(&'static str, String)> {
    let mut fields = header(r.status, r.source);
    fields.extend([
        ("Session", or_dash(r.session_id)),
        (
            "Failed run started",
            or_dash(
                r.failed_run_started_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC")),
            ),
        ),
        ("Records removed", r.records_removed.to_string()),
        ("Message", or_dash(r.message.as_deref())),
    ]);
    fields
}

fn integrity_fields(r: &IntegrityReport) -> Vec<(&'static str, String)> {
    let mut fields = header(r.status, r.source);
    fields.extend([
        ("Total records", r.total_records.to_string()),
        ("Integrity score", format!("{:.1}", r.integrity_score)),
        ("Negative values", r.issues.negative_values.to_string()),
        ("Null keys", r.issues.null_keys.to_string()),
        ("Empty identifiers", r.issues.empty_identifiers.to_string()),
        ("Future dates", r.issues.future_dates.to_string()),
        ("Stale snapshots", r.issues.stale_snapshots.to_string()),
        ("Duplicates", r.issues.duplicates.to_string()),
        ("Message", or_dash(r.message.as_deref())),
    ]);
    fields
}
