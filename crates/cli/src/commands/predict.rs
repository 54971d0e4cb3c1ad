//! Prediction and explanation commands

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tabled::Tabled;

use crate::client::{ApiClient, ExplanationResponse, PredictionResponse};
use crate::output::{
    color_confidence, color_impact, color_outcome, format_contribution, format_days, format_probability,
    print_json, OutputFormat,
};

/// Row for the outcome breakdown table
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Probability")]
    probability: String,
}

/// Row for the factors table
#[derive(Tabled)]
struct FactorRow {
    #[tabled(rename = "Feature")]
    feature: String,
    #[tabled(rename = "Impact")]
    impact: String,
    #[tabled(rename = "Contribution")]
    contribution: String,
    #[tabled(rename = "Description")]
    description: String,
}

/// Read a case record from a JSON file
pub fn read_case_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read case file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse case file {}", path.display()))
}

fn case_data(case_file: Option<PathBuf>) -> Result<Option<serde_json::Value>> {
    case_file.as_deref().map(read_case_file).transpose()
}

fn render_table<T: Tabled>(rows: Vec<T>) -> String {
    tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string()
}

fn print_header(prediction: &PredictionResponse) {
    println!("Case:    {}", prediction.case_id);
    println!("Model:   {}", prediction.model_version);
    println!("Request: {}", prediction.id);
}

/// Predict outcome probabilities for a case
pub async fn predict_status(
    client: &ApiClient,
    case_id: &str,
    case_file: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let prediction = client.predict_status(case_id, case_data(case_file)?).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            print_header(&prediction);
            let status = &prediction.predicted_status;
            let rows = vec![
                OutcomeRow {
                    outcome: color_outcome("approved"),
                    probability: format_probability(status.approved),
                },
                OutcomeRow {
                    outcome: color_outcome("rfe"),
                    probability: format_probability(status.rfe),
                },
                OutcomeRow {
                    outcome: color_outcome("denied"),
                    probability: format_probability(status.denied),
                },
            ];
            println!("{}", render_table(rows));

            let (outcome, p) = status.most_likely();
            println!("\nMost likely: {} ({})", color_outcome(outcome), format_probability(p));
        }
    }

    Ok(())
}

/// Predict remaining processing time for a case
pub async fn predict_time(
    client: &ApiClient,
    case_id: &str,
    case_file: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let prediction = client.predict_time(case_id, case_data(case_file)?).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            print_header(&prediction);
            let (lower, upper) = prediction.confidence_interval;
            println!(
                "\nEstimated remaining: {}",
                format_days(prediction.estimated_days_remaining, lower, upper)
            );
        }
    }

    Ok(())
}

fn print_explanation(explanation: &ExplanationResponse) {
    let rows: Vec<FactorRow> = explanation
        .top_factors
        .iter()
        .map(|f| FactorRow {
            feature: f.feature.clone(),
            impact: color_impact(&f.impact),
            contribution: format_contribution(f.contribution),
            description: f.description.clone(),
        })
        .collect();

    println!("{}", render_table(rows));
    println!("\nModel confidence: {}", color_confidence(explanation.model_confidence));
}

/// Show the top factors behind a prediction
pub async fn explain(
    client: &ApiClient,
    case_id: &str,
    case_file: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let explanation = client.explain(case_id, case_data(case_file)?).await?;

    match format {
        OutputFormat::Json => print_json(&explanation)?,
        OutputFormat::Table => {
            println!("Case: {}\n", case_id);
            print_explanation(&explanation);
        }
    }

    Ok(())
}

/// Show the plain-language summary of a prediction
pub async fn summarize(
    client: &ApiClient,
    case_id: &str,
    case_file: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let summary = client.summary(case_id, case_data(case_file)?).await?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            println!("{}\n", summary.summary);
            for factor in &summary.top_factors {
                println!(
                    "  {} {} ({}): {}",
                    color_impact(&factor.impact),
                    factor.feature,
                    factor.contribution,
                    factor.description
                );
            }
            println!(
                "\nConfidence: {} ({})",
                summary.confidence_level,
                color_confidence(summary.model_confidence)
            );
            println!("{}", summary.recommendation);
        }
    }

    Ok(())
}
