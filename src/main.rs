use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use common::models::{CopyResult, ModelSummary};
use di_model_copier::{BatchSummary, ModelCopier};
use settings::{AppSettings, ResourceConfig};

#[derive(Parser)]
#[command(name = "di-model-copier")]
#[command(version)]
#[command(about = "Copies custom Document Intelligence models between resources", long_about = None)]
struct Cli {
    /// Path to the settings file (TOML)
    #[arg(short, long, global = true, env = "DI_COPY_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configured source and targets
    Targets,

    /// Resolve keys and show each resource's custom model usage
    Check,

    /// List custom models, newest first
    Models {
        /// Resource display name (default: the source)
        #[arg(short, long)]
        resource: Option<String>,
    },

    /// List source models missing on every target
    Candidates,

    /// Copy models from the source to targets
    Copy {
        /// Model id to copy (repeatable)
        #[arg(short, long = "model", required_unless_present = "all_candidates")]
        models: Vec<String>,

        /// Target display name (repeatable, default: every target)
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Suffix appended to the destination model id
        #[arg(short, long)]
        suffix: Option<String>,

        /// Copy every candidate model
        #[arg(long, conflicts_with = "models")]
        all_candidates: bool,
    },
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_models(models: &[ModelSummary], json: bool) -> Result<()> {
    if json {
        return print_json(models);
    }

    if models.is_empty() {
        println!("No custom models");
    }
    for model in models {
        println!(
            "{:<40} {}",
            model.model_id,
            model.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

fn print_results(results: &[CopyResult], json: bool) -> Result<()> {
    if json {
        return print_json(results);
    }

    for result in results {
        let line = format!(
            "{} -> {} as '{}': {} ({} ms)",
            result.model_id,
            result.target_name,
            result.destination_model_id,
            result.status,
            result.elapsed_ms
        );
        match &result.error {
            Some(error) => println!("{}: {}", line, error),
            None => println!("{}", line),
        }
    }

    let summary = BatchSummary::from_results(results);
    println!(
        "{} succeeded, {} failed, {} timed out",
        summary.succeeded, summary.failed, summary.timed_out
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = AppSettings::load(cli.config.as_deref()).context("Loading settings")?;
    let _logging = logging::init(&settings.logging).context("Initializing logging")?;

    let resources = ResourceConfig::from_env().context("Reading resource configuration")?;
    let copier = ModelCopier::from_settings(&settings, resources)?;

    match cli.command {
        Commands::Targets => {
            let resources = copier.resources();
            if cli.json {
                print_json(&serde_json::json!({
                    "source": resources.source,
                    "targets": resources.targets,
                }))?;
            } else {
                println!("source: {}", resources.source);
                for target in &resources.targets {
                    println!("target: {}", target);
                }
            }
        }

        Commands::Check => {
            let checks = copier.check().await;
            let healthy = checks.iter().all(|c| c.outcome.is_ok());

            if cli.json {
                let report: Vec<_> = checks
                    .iter()
                    .map(|c| match &c.outcome {
                        Ok(details) => serde_json::json!({"resource": c.resource.display_name, "details": details}),
                        Err(error) => serde_json::json!({"resource": c.resource.display_name, "error": error}),
                    })
                    .collect();
                print_json(&report)?;
            } else {
                for check in &checks {
                    match &check.outcome {
                        Ok(details) => println!(
                            "{}: {}/{} custom models",
                            check.resource, details.custom_model_count, details.custom_model_limit
                        ),
                        Err(error) => println!("{}: {}", check.resource, error),
                    }
                }
            }

            if !healthy {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Models { resource } => {
            let name = resource.unwrap_or_else(|| copier.resources().source.display_name.clone());
            let models = copier.list_models(&name).await?;
            print_models(&models, cli.json)?;
        }

        Commands::Candidates => {
            let candidates = copier.copy_candidates().await?;
            print_models(&candidates, cli.json)?;
        }

        Commands::Copy {
            models,
            targets,
            suffix,
            all_candidates,
        } => {
            let models = if all_candidates {
                let candidates: Vec<String> = copier
                    .copy_candidates()
                    .await?
                    .into_iter()
                    .map(|m| m.model_id)
                    .collect();
                info!("Selected {} candidate model(s)", candidates.len());
                candidates
            } else {
                models
            };

            let results = copier.run_batch(&models, &targets, suffix.as_deref()).await?;
            print_results(&results, cli.json)?;

            if !BatchSummary::from_results(&results).all_succeeded() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
