use stocksync::FallbackManager;
use stocksync::fallback::{CachedDataReport, EstimateReport, InventoryEstimate};
use tabled::Tabled;

use crate::FallbackAction;
use crate::commands::shared::{
    OutputFormat, or_dash, print_fields, print_json, print_table, styled_status,
};
use crate::config::Config;

#[derive(Debug, Clone, Tabled)]
pub(crate) struct EstimateRow {
    #[tabled(rename = "SKU")]
    pub sku: String,
    #[tabled(rename = "Warehouse")]
    pub warehouse: String,
    #[tabled(rename = "Type")]
    pub stock_type: String,
    #[tabled(rename = "Estimate")]
    pub estimate: i64,
    #[tabled(rename = "Mean")]
    pub mean: String,
    #[tabled(rename = "Std Dev")]
    pub std_dev: String,
    #[tabled(rename = "Samples")]
    pub samples: usize,
}

impl From<&InventoryEstimate> for EstimateRow {
    fn from(e: &InventoryEstimate) -> Self {
        Self {
            sku: e.sku.clone(),
            warehouse: or_dash(e.warehouse_id.as_deref()),
            stock_type: e.stock_type.clone(),
            estimate: e.estimated_quantity,
            mean: format!("{:.2}", e.mean),
            std_dev: format!("{:.2}", e.std_dev),
            samples: e.samples,
        }
    }
}

fn cached_fields(r: &CachedDataReport) -> Vec<(&'static str, String)> {
    vec![
        ("Status", styled_status(r.status)),
        ("Source", r.source.to_string()),
        ("Copied from", or_dash(r.copied_from)),
        ("Records copied", r.records_copied.to_string()),
        ("Session", or_dash(r.session_id)),
        ("Message", or_dash(r.message.as_deref())),
    ]
}

fn estimate_fields(r: &EstimateReport) -> Vec<(&'static str, String)> {
    vec![
        ("Status", styled_status(r.status)),
        ("Source", r.source.to_string()),
        ("Days back", r.days_back.to_string()),
        ("Data points", r.data_points.to_string()),
        ("Estimated items", r.estimates.len().to_string()),
        ("Estimated total", r.total_quantity().to_string()),
        ("Message", or_dash(r.message.as_deref())),
    ]
}

pub(crate) async fn handle_fallback(
    action: FallbackAction,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = stocksync::connect_and_migrate(database_url).await?;
    let manager = FallbackManager::new(db, config.fallback.clone());

    let status = match action {
        FallbackAction::Cached {
            source,
            max_age_hours,
            format,
        } => {
            let report = manager.use_cached_data(source, max_age_hours).await;
            match format {
                OutputFormat::Table => print_fields(cached_fields(&report)),
                OutputFormat::Json => print_json(&report)?,
            }
            report.status
        }
        FallbackAction::Estimate {
            source,
            days_back,
            format,
        } => {
            let report = manager
                .estimate_inventory_from_history(source, days_back)
                .await;
            match format {
                OutputFormat::Table => {
                    print_fields(estimate_fields(&report));
                    if !report.estimates.is_empty() {
                        print_table(report.estimates.iter().map(EstimateRow::from).collect());
                    }
                }
                OutputFormat::Json => print_json(&report)?,
            }
            report.status
        }
    };

    if status.is_error() {
        return Err("Fallback operation failed".into());
    }
    Ok(())
}
