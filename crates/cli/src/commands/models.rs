//! Backend management commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, ModelInfo};
use crate::output::{print_info, print_json, print_success, print_warning, OutputFormat};

/// Row for the models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Trained")]
    trained: String,
    #[tabled(rename = "Trained At")]
    trained_at: String,
    #[tabled(rename = "Metrics")]
    metrics: String,
    #[tabled(rename = "Active")]
    active: String,
}

fn check(flag: bool) -> String {
    if flag {
        "✓".to_string()
    } else {
        "".to_string()
    }
}

fn format_metrics(model: &ModelInfo) -> String {
    model
        .metrics
        .iter()
        .map(|(name, value)| format!("{}={:.3}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// List every backend with its training state
pub async fn list_models(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let models = client.list_models().await?;

    match format {
        OutputFormat::Json => print_json(&models)?,
        OutputFormat::Table => {
            if models.is_empty() {
                print_warning("No backends reported");
                return Ok(());
            }

            let rows: Vec<ModelRow> = models
                .iter()
                .map(|m| ModelRow {
                    kind: m.kind.clone(),
                    version: m.version.clone(),
                    trained: check(m.trained),
                    trained_at: m.trained_at.clone().unwrap_or_else(|| "-".to_string()),
                    metrics: format_metrics(m),
                    active: check(m.is_active),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

/// Show the backend answering predictions
pub async fn show_active(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let active = client.active_model().await?;

    match format {
        OutputFormat::Json => print_json(&active)?,
        OutputFormat::Table => print_info(&format!("Active backend: {} ({})", active.kind, active.version)),
    }

    Ok(())
}

/// Switch the active backend
pub async fn switch_model(client: &ApiClient, model_type: &str, format: OutputFormat) -> Result<()> {
    let active = client.switch_model(model_type).await?;

    match format {
        OutputFormat::Json => print_json(&active)?,
        OutputFormat::Table => {
            print_success(&format!("Switched to {} ({})", active.kind, active.version));
            if active.kind != model_type.to_lowercase() {
                print_warning(&format!("Requested '{}' is served as '{}'", model_type, active.kind));
            }
        }
    }

    Ok(())
}
