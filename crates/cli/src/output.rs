//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse a format name stored in the config file
    pub fn from_config(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a probability as percentage
pub fn format_probability(p: f64) -> String {
    format!("{:.1}%", p * 100.0)
}

/// Format a day estimate with its interval
pub fn format_days(median: u32, lower: u32, upper: u32) -> String {
    format!("{} days ({}-{})", median, lower, upper)
}

/// Format a signed contribution
pub fn format_contribution(contribution: f64) -> String {
    format!("{:+.3}", contribution)
}

/// Color an outcome name
pub fn color_outcome(outcome: &str) -> String {
    match outcome.to_lowercase().as_str() {
        "approved" => outcome.green().to_string(),
        "rfe" => outcome.yellow().to_string(),
        "denied" => outcome.red().to_string(),
        _ => outcome.to_string(),
    }
}

/// Color a factor impact
pub fn color_impact(impact: &str) -> String {
    match impact {
        "positive" => impact.green().to_string(),
        "negative" => impact.red().to_string(),
        _ => impact.dimmed().to_string(),
    }
}

/// Color confidence based on value
pub fn color_confidence(confidence: f64) -> String {
    let formatted = format!("{:.0}%", confidence * 100.0);
    if confidence >= 0.85 {
        formatted.green().to_string()
    } else if confidence >= 0.70 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}
