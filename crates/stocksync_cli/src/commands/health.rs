use stocksync::HealthMonitor;
use stocksync::health::{Anomaly, HealthReport, HealthStatus, SyncMetrics};
use tabled::Tabled;

use crate::commands::shared::{OutputFormat, or_dash, print_json, print_table};
use crate::config::Config;

#[derive(Debug, Clone, Tabled)]
pub(crate) struct SourceHealthRow {
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Runs (24h)")]
    pub runs: u64,
    #[tabled(rename = "Success %")]
    pub success_rate: String,
    #[tabled(rename = "Avg Duration")]
    pub average_duration: String,
    #[tabled(rename = "Errors (24h)")]
    pub errors: u64,
    #[tabled(rename = "Last Success")]
    pub last_success: String,
    #[tabled(rename = "Records")]
    pub records: u64,
    #[tabled(rename = "Latest Snapshot")]
    pub latest_snapshot: String,
}

impl From<&SyncMetrics> for SourceHealthRow {
    fn from(m: &SyncMetrics) -> Self {
        Self {
            source: m.source.to_string(),
            status: styled_health(m.status),
            runs: m.runs_24h,
            success_rate: or_dash(m.success_rate_24h.map(|r| format!("{:.1}", r))),
            average_duration: or_dash(m.average_duration_ms.map(|ms| format!("{:.0}ms", ms))),
            errors: m.error_count_24h,
            last_success: or_dash(
                m.hours_since_last_success
                    .map(|h| format!("{:.1}h ago", h)),
            ),
            records: m.total_records,
            latest_snapshot: or_dash(m.latest_snapshot_date),
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub(crate) struct AnomalyRow {
    #[tabled(rename = "Severity")]
    pub severity: String,
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Type")]
    pub anomaly_type: String,
    #[tabled(rename = "Affected")]
    pub affected: u64,
    #[tabled(rename = "Description")]
    pub description: String,
}

impl From<&Anomaly> for AnomalyRow {
    fn from(a: &Anomaly) -> Self {
        Self {
            severity: a.severity.as_str().to_string(),
            source: a.source.to_string(),
            anomaly_type: a.anomaly_type.as_str().to_string(),
            affected: a.affected_records,
            description: a.description.clone(),
        }
    }
}

fn styled_health(status: HealthStatus) -> String {
    let text = status.as_str();
    match status {
        HealthStatus::Healthy => console::style(text).green().to_string(),
        HealthStatus::Warning => console::style(text).yellow().to_string(),
        HealthStatus::Critical => console::style(text).red().bold().to_string(),
        HealthStatus::Unknown => console::style(text).dim().to_string(),
    }
}

fn print_report(report: &HealthReport) {
    println!(
        "Overall: {} (generated {})",
        styled_health(report.overall_status),
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    print_table(report.sources.iter().map(SourceHealthRow::from).collect());

    if report.anomalies.is_empty() {
        println!("No anomalies detected.");
    } else {
        let mut anomalies: Vec<&Anomaly> = report.anomalies.iter().collect();
        anomalies.sort_by(|a, b| b.severity.cmp(&a.severity));
        print_table(anomalies.into_iter().map(AnomalyRow::from).collect());
    }

    if !report.recommendations.is_empty() {
        println!("Recommendations:");
        for recommendation in &report.recommendations {
            println!("  - {}", recommendation);
        }
    }
}

pub(crate) async fn handle_health(
    config: &Config,
    database_url: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = stocksync::connect_and_migrate(database_url).await?;
    let monitor = HealthMonitor::new(db, config.health.clone());
    let report = monitor.get_health_report().await?;

    match format {
        OutputFormat::Table => print_report(&report),
        OutputFormat::Json => print_json(&report)?,
    }

    Ok(())
}
