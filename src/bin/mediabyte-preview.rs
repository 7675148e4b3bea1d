//! Command-line front end for the preview renderer.
//!
//! Usage:
//!   mediabyte-preview render page.html --out preview.html
//!   mediabyte-preview render card.jsx --mode component
//!   mediabyte-preview generate --provider claude --preview "a pricing table"
//!   mediabyte-preview check *.jsx

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mediabyte_preview::generate::GenerateResponse;
use mediabyte_preview::{
    check_source, AppConfig, GeneratedCode, Preview, PreviewConfig, PreviewError, PreviewMode,
    PreviewSnapshot, PreviewStatus, Provider, ProviderConfig, SignalSource, UiGenerator,
};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

#[derive(Parser)]
#[command(name = "mediabyte-preview")]
#[command(version)]
#[command(about = "Render and check generated UI code in an isolated preview host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML config file with `preview:` and `generator:` sections
    #[arg(long, short, global = true, env = "MEDIABYTE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a code file (or `-` for stdin) and report the final status
    Render {
        input: String,

        /// markup or component (defaults to the configured mode)
        #[arg(long, short)]
        mode: Option<PreviewMode>,

        /// Write the preview document here
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Generate UI code from a prompt with an LLM provider
    Generate {
        #[arg(long, short, default_value = "claude")]
        provider: Provider,

        /// Render the generated code in component mode
        #[arg(long)]
        preview: bool,

        /// Write the preview document (with --preview) or the code here
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print `{"code": ...}` / `{"error": ...}` instead of raw code
        #[arg(long)]
        json: bool,

        prompt: String,
    },

    /// Validate code files without rendering them
    Check {
        #[arg(long, short, default_value = "component")]
        mode: PreviewMode,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Render {
            input,
            mode,
            out,
            timeout_ms,
        } => {
            let mut preview_config = config.preview;
            if let Some(mode) = mode {
                preview_config.mode = mode;
            }
            if let Some(ms) = timeout_ms {
                preview_config.load_timeout_ms = ms;
            }
            let source = read_input(&input)?;
            let snapshot = render(preview_config, GeneratedCode::new(source)).await?;
            report(&snapshot, out.as_deref())
        }
        Commands::Generate {
            provider,
            preview,
            out,
            json,
            prompt,
        } => {
            let provider_config = ProviderConfig::from_env(provider, &config.generator)?;
            let result = UiGenerator::new().generate(&provider_config, &prompt).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&GenerateResponse::from(&result))?);
            }
            let ui = result?;
            if !json {
                println!("{}", ui.code);
            }
            if !preview {
                if let Some(path) = out {
                    write_file(&path, ui.code.as_str())?;
                }
                return Ok(ExitCode::SUCCESS);
            }
            let preview_config = PreviewConfig {
                mode: PreviewMode::Component,
                ..config.preview
            };
            let snapshot = render(preview_config, ui.code).await?;
            report(&snapshot, out.as_deref())
        }
        Commands::Check { mode, files } => {
            let mut failed = false;
            for path in &files {
                let result = std::fs::read_to_string(path)
                    .map_err(PreviewError::from)
                    .and_then(|source| check_source(&source, mode));
                match result {
                    Ok(()) => println!("✓ {} is valid", path.display()),
                    Err(e) => {
                        eprintln!("✗ {} has errors:", path.display());
                        print_error(&e);
                        failed = true;
                    }
                }
            }
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

async fn render(config: PreviewConfig, code: GeneratedCode) -> Result<PreviewSnapshot> {
    // no frame here to report back
    let config = PreviewConfig {
        signal_source: SignalSource::Host,
        ..config
    };
    let mut preview = Preview::new(config)?;
    let snapshot = preview.render_and_settle(&code).await;
    for line in preview.console() {
        eprintln!("[console] {}", line);
    }
    match snapshot {
        Some(snapshot) => Ok(snapshot),
        None => bail!("preview was detached before it settled"),
    }
}

fn report(snapshot: &PreviewSnapshot, out: Option<&Path>) -> Result<ExitCode> {
    if let (Some(path), Some(document)) = (out, snapshot.document.as_deref()) {
        write_file(path, document)?;
        eprintln!("wrote {}", path.display());
    }
    match snapshot.status {
        PreviewStatus::Ready => {
            println!("✓ ready");
            Ok(ExitCode::SUCCESS)
        }
        PreviewStatus::Error | PreviewStatus::Loading => {
            println!(
                "✗ error: {}",
                snapshot.message.as_deref().unwrap_or("Unknown runtime error")
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn print_error(error: &PreviewError) {
    match error {
        PreviewError::ParseError {
            line,
            column,
            detail,
        } => {
            eprintln!("  Parse error at line {}, column {}:", line, column);
            eprintln!("    {}", detail);
        }
        PreviewError::LimitExceeded { what, limit } => {
            eprintln!("  Limit exceeded:");
            eprintln!("    {} (limit {})", what, limit);
        }
        other => {
            eprintln!("  {}", other);
        }
    }
}
