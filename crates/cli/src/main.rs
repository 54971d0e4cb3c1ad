//! Case Outcome Predictor CLI
//!
//! A command-line tool for requesting predictions and explanations and for
//! managing which backend the prediction server uses.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{models, predict};
use std::path::PathBuf;

/// Case Outcome Predictor CLI
#[derive(Parser)]
#[command(name = "casepred")]
#[command(author, version, about = "CLI for the Case Outcome Predictor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via CASEPRED_API_URL env var)
    #[arg(long, env = "CASEPRED_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request predictions for a case
    #[command(subcommand)]
    Predict(PredictCommands),

    /// Explain the factors behind a case's prediction
    Explain {
        /// Case identifier
        case_id: String,

        /// JSON file holding the case record
        #[arg(long)]
        case_file: Option<PathBuf>,

        /// Show a plain-language summary instead of raw factors
        #[arg(long)]
        summary: bool,
    },

    /// Inspect and switch prediction backends
    #[command(subcommand)]
    Models(ModelsCommands),

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum PredictCommands {
    /// Predict the outcome probabilities
    Status {
        /// Case identifier
        case_id: String,

        /// JSON file holding the case record
        #[arg(long)]
        case_file: Option<PathBuf>,
    },

    /// Predict the remaining processing time
    Time {
        /// Case identifier
        case_id: String,

        /// JSON file holding the case record
        #[arg(long)]
        case_file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ModelsCommands {
    /// List all backends with their training state
    List,

    /// Show the active backend
    Active,

    /// Switch the active backend (heuristic, baseline, neural)
    Switch {
        /// Backend type
        model_type: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Persist the API URL
    SetUrl {
        /// API endpoint URL
        url: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::Config::load()?;

    let api_url = cfg.resolve_api_url(cli.api_url.as_deref());
    let format = cli
        .format
        .or_else(|| cfg.default_format.as_deref().and_then(output::OutputFormat::from_config))
        .unwrap_or_default();

    // Config commands must work even when the stored URL is broken
    let connect = || client::ApiClient::new(&api_url);

    match cli.command {
        Commands::Predict(predict_cmd) => match predict_cmd {
            PredictCommands::Status { case_id, case_file } => {
                predict::predict_status(&connect()?, &case_id, case_file, format).await?;
            }
            PredictCommands::Time { case_id, case_file } => {
                predict::predict_time(&connect()?, &case_id, case_file, format).await?;
            }
        },
        Commands::Explain {
            case_id,
            case_file,
            summary,
        } => {
            if summary {
                predict::summarize(&connect()?, &case_id, case_file, format).await?;
            } else {
                predict::explain(&connect()?, &case_id, case_file, format).await?;
            }
        }
        Commands::Models(models_cmd) => match models_cmd {
            ModelsCommands::List => models::list_models(&connect()?, format).await?,
            ModelsCommands::Active => models::show_active(&connect()?, format).await?,
            ModelsCommands::Switch { model_type } => {
                models::switch_model(&connect()?, &model_type, format).await?;
            }
        },
        Commands::Config(config_cmd) => run_config(config_cmd, cfg, &api_url, format)?,
    }

    Ok(())
}

fn run_config(command: ConfigCommands, mut cfg: config::Config, api_url: &str, format: output::OutputFormat) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("api_url: {}", api_url);
            println!("format: {:?}", format);
            println!("config file: {}", config::Config::config_path()?.display());
        }
        ConfigCommands::SetUrl { url } => {
            url::Url::parse(&url)?;
            cfg.api_url = Some(url.clone());
            let path = cfg.save()?;
            output::print_success(&format!("API URL set to {} ({})", url, path.display()));
        }
    }
    Ok(())
}
