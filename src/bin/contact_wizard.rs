//! Contact Wizard Command Line Interface
//!
//! # Usage
//!
//! ```bash
//! # Validate one or more form definitions
//! contact_wizard check config/forms/band_registration.yaml
//!
//! # Replay a scripted session against fixture contacts
//! contact_wizard replay --form config/forms/band_registration.yaml \
//!     --fixtures config/fixtures/band.yaml --script config/scripts/save_and_resume.yaml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use contact_wizard::replay::{self, Fixtures, Script};
use contact_wizard::{DefinitionError, EngineConfig, FormDefinition, FormEngine};

#[derive(Parser)]
#[command(name = "contact_wizard")]
#[command(version)]
#[command(about = "Validate contact wizard forms and replay scripted sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (defaults plus CONTACT_WIZARD_* overrides if absent)
    #[arg(long, short, global = true, env = "CONTACT_WIZARD_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate form definitions and report every error found
    Check {
        /// Form definition files
        #[arg(required = true)]
        forms: Vec<PathBuf>,
    },

    /// Run a session script against fixture contacts
    Replay {
        #[arg(long)]
        form: PathBuf,

        /// Contacts and relationships to seed the in-memory CRM with
        #[arg(long)]
        fixtures: PathBuf,

        #[arg(long)]
        script: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,contact_wizard=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Check { forms } => cmd_check(forms, cli.format),
        Commands::Replay {
            form,
            fixtures,
            script,
        } => cmd_replay(cli.config.as_deref(), form, fixtures, script, cli.format).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_check(forms: &[PathBuf], format: OutputFormat) -> Result<bool> {
    let mut all_valid = true;
    let mut report = Vec::new();

    for path in forms {
        let (valid, errors) = match FormDefinition::from_file(path) {
            Ok(_) => (true, Vec::new()),
            Err(DefinitionError::Invalid(errors)) => {
                (false, errors.iter().map(|e| e.to_string()).collect())
            }
            Err(e) => (false, vec![e.to_string()]),
        };
        all_valid &= valid;

        match format {
            OutputFormat::Text => {
                if valid {
                    println!("{}: ok", path.display());
                } else {
                    println!("{}: {} error(s)", path.display(), errors.len());
                    for error in &errors {
                        println!("  {}", error);
                    }
                }
            }
            OutputFormat::Json => report.push(serde_json::json!({
                "form": path.display().to_string(),
                "valid": valid,
                "errors": errors,
            })),
        }
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(all_valid)
}

async fn cmd_replay(
    config: Option<&Path>,
    form: &Path,
    fixtures: &Path,
    script: &Path,
    format: OutputFormat,
) -> Result<bool> {
    let config = match config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::from_env().context("Invalid CONTACT_WIZARD_* environment")?,
    };

    let definition = FormDefinition::from_file(form)
        .with_context(|| format!("Failed to load form {}", form.display()))?;
    let form_id = definition.id.clone();

    let fixtures = std::fs::read_to_string(fixtures)
        .with_context(|| format!("Failed to read {}", fixtures.display()))
        .and_then(|s| Fixtures::from_yaml(&s).context("Failed to parse fixtures"))?;
    let script = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read {}", script.display()))
        .and_then(|s| Script::from_yaml(&s).context("Failed to parse script"))?;

    let directory = Arc::new(fixtures.into_directory());
    let drafts = config.draft.build();
    let engine = FormEngine::new([definition], directory.clone(), directory, drafts, config);

    info!(form = %form_id, steps = script.steps.len(), "replaying script");
    let reports = replay::run(&engine, &form_id, &script).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            for report in &reports {
                println!(
                    "{:>3}. {:<10} page {}  {}",
                    report.step, report.action, report.page, report.result
                );
            }
        }
    }
    Ok(true)
}
