use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod error;
mod evaluation;
mod input;
mod models;
mod output;
mod parser;
mod prompts;
mod runner;
mod training;
mod validate;

use crate::client::{OpenAiClient, RetryingClient};
use crate::config::RunConfig;
use crate::evaluation::{Evaluator, EvaluatorSettings};
use crate::models::PromptVariant;
use crate::output::ReportWriter;
use crate::runner::Runner;
use crate::validate::ValidationReport;

/// Grade student answers from a CSV file with a hosted language model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to an optional TOML run configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output - log every prompt and raw completion
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask whether each answer is adequate and record the reply as the score
    Single {
        /// Input CSV name without the .csv extension
        input: String,
    },
    /// Score with 1/0 and ask for an explanation when the reply equals TRIGGER
    Double {
        /// Input CSV name without the .csv extension
        input: String,
        /// Reply that triggers the follow-up question, e.g. "0"
        trigger: Option<String>,
    },
    /// Translate Spanish answers to English, then score them
    Spanish {
        /// Input CSV name without the .csv extension
        input: String,
    },
    /// Score with a fine-tuned text-completion model
    Completion {
        /// Input CSV name without the .csv extension
        input: String,
    },
    /// Convert question,answer,score rows into fine-tuning JSONL
    CsvToJsonl {
        /// Input CSV name without the .csv extension
        input: String,
        /// JSONL file to recreate
        #[arg(short, long, default_value = training::DEFAULT_TRAINING_FILE)]
        output: PathBuf,
    },
    /// Check that every line of a JSONL file is valid JSON
    ValidateJsonl {
        /// JSONL file to check
        file: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("answer_grader={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_pipeline(
    config_path: Option<&Path>,
    variant: PromptVariant,
    input: &str,
) -> anyhow::Result<()> {
    // everything that can be misconfigured is checked before the first request
    let config = RunConfig::load(config_path)?;
    let input_path = input::input_path(input);
    let rows = input::load_rows(&input_path)
        .with_context(|| format!("Failed to load input rows from {}", input_path.display()))?;
    let client = RetryingClient::new(OpenAiClient::from_config(&config)?, config.retry.clone());

    info!(rows = rows.len(), "loaded {}", input_path.display());

    let report = ReportWriter::new(&config.output_dir, &variant, Local::now());
    let evaluator = Evaluator::new(client, variant, EvaluatorSettings::from(&config));
    Runner::new(evaluator).run(&rows, report).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let Args {
        config,
        verbose,
        command,
    } = Args::parse();
    init_tracing(verbose);

    if let Err(e) = dotenv {
        if !e.not_found() {
            error!("could not load .env: {}", e);
        }
    }

    let config = config.as_deref();
    match command {
        Command::Single { input } => {
            run_pipeline(config, PromptVariant::SingleScore, &input).await?;
        }
        Command::Double { input, trigger } => {
            run_pipeline(config, PromptVariant::DoublePrompt { trigger }, &input).await?;
        }
        Command::Spanish { input } => {
            run_pipeline(config, PromptVariant::Spanish, &input).await?;
        }
        Command::Completion { input } => {
            run_pipeline(config, PromptVariant::LegacyCompletion, &input).await?;
        }
        Command::CsvToJsonl { input, output } => {
            training::convert(&input::input_path(&input), &output)?;
            info!("DONE");
        }
        Command::ValidateJsonl { file } => match validate::validate_file(&file)? {
            ValidationReport::Valid { lines } => info!(lines, "NO ERRORS!"),
            ValidationReport::Invalid { line, message } => {
                error!("ERROR ON LINE {}: {}", line, message);
                anyhow::bail!("{} is not valid JSONL (line {})", file.display(), line);
            }
        },
    }

    Ok(())
}
