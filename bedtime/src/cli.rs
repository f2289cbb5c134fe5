use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use bedtime_core::{load_registry, save_registry, Mode, Pipeline};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::{interactive, report};

#[derive(Debug, Parser)]
#[command(name = "bedtime", about = "Generate bedtime stories for ages 5-10")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one story
    Generate(GenerateArgs),
    /// Read requests line by line, sharing the name registry between them
    Interactive(InteractiveArgs),
    /// List the quality modes
    Modes,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// fast, balanced or best
    #[arg(long, default_value_t = Mode::Balanced)]
    mode: Mode,
    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
    /// Load and save used character names here
    #[arg(long)]
    names_file: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
    #[arg(value_name = "REQUEST", required = true)]
    request: Vec<String>,
}

#[derive(Debug, Args)]
struct InteractiveArgs {
    #[arg(long, default_value_t = Mode::Balanced)]
    mode: Mode,
    #[arg(long)]
    names_file: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        match self.command {
            Command::Generate(args) => {
                init_logging(args.verbose);
                let pipeline = build_pipeline(args.names_file.as_deref()).await?;

                let request = args.request.join(" ");
                let result = pipeline.run(&request, args.mode).await;

                if let Some(path) = &args.names_file {
                    persist_names(&pipeline, path).await?;
                }

                if args.json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    report::print_result(&result);
                }

                Ok(if result.success {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            }
            Command::Interactive(args) => {
                init_logging(args.verbose);
                let pipeline = build_pipeline(args.names_file.as_deref()).await?;
                interactive::run(&pipeline, args.mode, args.names_file.as_deref()).await?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Modes => {
                report::print_modes();
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

async fn build_pipeline(names_file: Option<&Path>) -> anyhow::Result<Pipeline> {
    let pipeline = Pipeline::from_env().context(
        "failed to configure the story pipeline (set ANTHROPIC_API_KEY in .env or the environment)",
    )?;

    if let Some(path) = names_file {
        let loaded = load_registry(pipeline.registry(), path)
            .await
            .with_context(|| format!("failed to load names from {}", path.display()))?;
        info!(loaded, path = %path.display(), "name registry loaded");
    }

    Ok(pipeline)
}

pub(crate) async fn persist_names(pipeline: &Pipeline, path: &Path) -> anyhow::Result<()> {
    save_registry(pipeline.registry(), path)
        .await
        .with_context(|| format!("failed to save names to {}", path.display()))
}

/// Logs go to stderr so `--json` output stays clean.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "bedtime", "generate", "--mode", "FAST", "--json", "a", "brave", "rabbit",
        ])
        .unwrap();

        match cli.command {
            Command::Generate(args) => {
                assert_eq!(args.mode, Mode::Fast);
                assert!(args.json);
                assert_eq!(args.request.join(" "), "a brave rabbit");
                assert!(args.names_file.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_generate_requires_request() {
        assert!(Cli::try_parse_from(["bedtime", "generate"]).is_err());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(Cli::try_parse_from(["bedtime", "generate", "--mode", "turbo", "x"]).is_err());
    }

    #[test]
    fn test_interactive_defaults_to_balanced() {
        let cli = Cli::try_parse_from(["bedtime", "interactive"]).unwrap();
        match cli.command {
            Command::Interactive(args) => assert_eq!(args.mode, Mode::Balanced),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
