use std::sync::Arc;

use clap::ValueEnum;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use stocksync::marketplace::{OzonClient, WildberriesClient};
use stocksync::{Marketplace, MarketplaceClient, OperationStatus, SyncService};
use tabled::Tabled;

use crate::config::Config;
use crate::progress::progress_callback;

/// Output format for reports.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// Print rows as a rounded table.
pub(crate) fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = tabled::Table::new(rows);
    table.with(tabled::settings::Style::rounded());
    println!("{}", table);
}

#[derive(Debug, Clone, Tabled)]
pub(crate) struct FieldRow {
    #[tabled(rename = "Field")]
    pub field: &'static str,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Print a report as a two-column field/value table.
pub(crate) fn print_fields(fields: Vec<(&'static str, String)>) {
    print_table(
        fields
            .into_iter()
            .map(|(field, value)| FieldRow { field, value })
            .collect(),
    );
}

/// Print any report as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Deduplicate sources while keeping the order they were given in.
pub(crate) fn unique_sources(sources: Vec<Marketplace>) -> Vec<Marketplace> {
    let mut unique = Vec::with_capacity(sources.len());
    for source in sources {
        if !unique.contains(&source) {
            unique.push(source);
        }
    }
    unique
}

/// Build an HTTP client for a marketplace from its configured credentials.
pub(crate) fn build_client(
    config: &Config,
    source: Marketplace,
) -> Result<Arc<dyn MarketplaceClient>, Box<dyn std::error::Error>> {
    match source {
        Marketplace::Ozon => {
            if !config.ozon.is_configured() {
                return Err("Ozon credentials are not configured. \
                    Set STOCKSYNC_OZON__CLIENT_ID and STOCKSYNC_OZON__API_KEY, \
                    or add them to the [ozon] section of your config file."
                    .into());
            }
            Ok(Arc::new(OzonClient::new(&config.ozon)?))
        }
        Marketplace::Wildberries => {
            if !config.wildberries.is_configured() {
                return Err("Wildberries API token is not configured. \
                    Set STOCKSYNC_WILDBERRIES__API_KEY, \
                    or add it to the [wildberries] section of your config file."
                    .into());
            }
            Ok(Arc::new(WildberriesClient::new(&config.wildberries)?))
        }
    }
}

/// Build a started sync service with clients for the given sources.
pub(crate) async fn start_service(
    config: &Config,
    db: DatabaseConnection,
    sources: &[Marketplace],
) -> Result<SyncService, Box<dyn std::error::Error>> {
    let mut builder = SyncService::builder(db)
        .config(config.service_config())
        .progress(progress_callback());
    for &source in sources {
        builder = builder.client(build_client(config, source)?);
    }

    let service = builder.build()?;
    let orphaned = service.start().await?;
    if orphaned > 0 {
        tracing::warn!(orphaned, "Marked runs left over from an earlier crash as failed");
    }
    Ok(service)
}

/// Status text, colored when stdout is a terminal.
pub(crate) fn styled_status(status: OperationStatus) -> String {
    let text = status.as_str();
    match status {
        OperationStatus::Success => console::style(text).green().to_string(),
        OperationStatus::Error => console::style(text).red().to_string(),
        _ => console::style(text).yellow().to_string(),
    }
}

/// Format a duration in milliseconds as a short human-readable string.
pub(crate) fn format_duration_ms(ms: i64) -> String {
    let ms = ms.max(0);
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        let secs = ms / 1_000;
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

pub(crate) fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_sources_keeps_first_occurrence() {
        let sources = vec![
            Marketplace::Wildberries,
            Marketplace::Ozon,
            Marketplace::Wildberries,
        ];
        assert_eq!(
            unique_sources(sources),
            vec![Marketplace::Wildberries, Marketplace::Ozon]
        );
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(-5), "0ms");
        assert_eq!(format_duration_ms(250), "250ms");
        assert_eq!(format_duration_ms(1_500), "1.5s");
        assert_eq!(format_duration_ms(125_000), "2m 5s");
    }

    #[test]
    fn test_build_client_requires_credentials() {
        let config = Config::default();
        let err = build_client(&config, Marketplace::Ozon)
            .err()
            .expect("unconfigured Ozon should fail");
        assert!(err.to_string().contains("STOCKSYNC_OZON__API_KEY"));

        let err = build_client(&config, Marketplace::Wildberries)
            .err()
            .expect("unconfigured Wildberries should fail");
        assert!(err.to_string().contains("STOCKSYNC_WILDBERRIES__API_KEY"));
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(None::<u64>), "-");
        assert_eq!(or_dash(Some(3)), "3");
    }
}
