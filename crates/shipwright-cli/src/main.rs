//! shipwright: build, push, and deploy services to the platform.
//!
//! # Usage
//!
//! ```text
//! shipwright build  --context . --name bookstore-api --version 1.4.0
//! shipwright push   --context . --name bookstore-api --version 1.4.0
//! shipwright deploy --descriptor deploy.toml --image bookstore-api:1.4.0-3f2a9c1b7d04
//! shipwright history --service bookstore-api --limit 10
//! shipwright init   --service bookstore-api
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

mod commands;

#[derive(Parser)]
#[command(
    name = "shipwright",
    about = "Shipwright: build, push, and deploy services",
    version
)]
struct Cli {
    /// Path to shipwright.toml (defaults are used when omitted).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override [state].data_dir.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image artifact from a directory.
    Build {
        /// Build context directory.
        #[arg(short, long, default_value = ".")]
        context: PathBuf,
        /// Repository name.
        #[arg(short, long)]
        name: String,
        /// Semantic version of this build.
        #[arg(short, long)]
        version: String,
        /// Write the image manifest to this file.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Build an artifact and push it to the registry.
    Push {
        #[arg(short, long, default_value = ".")]
        context: PathBuf,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        version: String,
    },
    /// Deploy a descriptor and wait for the service to converge.
    ///
    /// Exit codes: 0 converged, 1 error, 2 invalid descriptor,
    /// 3 convergence timeout, 4 cancelled, 5 unauthorized,
    /// 6 rolled back, 7 rollback failed.
    Deploy {
        /// Descriptor file.
        #[arg(short, long, default_value = "deploy.toml")]
        descriptor: PathBuf,
        /// Override the descriptor's service name.
        #[arg(short, long)]
        service: Option<String>,
        /// Override the descriptor's image reference.
        #[arg(short, long)]
        image: Option<String>,
        /// Convergence timeout, e.g. "90s" or "10m".
        #[arg(short, long, value_parser = parse_timeout)]
        timeout: Option<Duration>,
        /// Roll back to the last converged revision on failure.
        #[arg(long, overrides_with = "no_rollback")]
        rollback: bool,
        /// Never roll back, even if the config enables it.
        #[arg(long, overrides_with = "rollback")]
        no_rollback: bool,
    },
    /// Show the deployment attempt log for a service.
    History {
        #[arg(short, long)]
        service: String,
        /// Show only the most recent N attempts.
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Write a descriptor scaffold.
    Init {
        #[arg(short, long)]
        service: String,
        #[arg(short, long, default_value = "deploy.toml")]
        out: PathBuf,
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    shipwright_core::parse_duration(s).ok_or_else(|| format!("invalid duration {s:?}"))
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,shipwright=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(commands::EXIT_ERROR)
        }
    }
}

/// Runs the command and returns the process exit code.
async fn run(cli: Cli) -> anyhow::Result<u8> {
    let settings = commands::Settings::load(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Build {
            context,
            name,
            version,
            out,
        } => {
            commands::build::build(&context, &name, &version, out.as_deref())?;
            Ok(0)
        }
        Commands::Push {
            context,
            name,
            version,
        } => commands::build::push(&settings, &context, &name, &version).await,
        Commands::Deploy {
            descriptor,
            service,
            image,
            timeout,
            rollback,
            no_rollback,
        } => {
            let rollback = match (rollback, no_rollback) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let request = commands::deploy::DeployRequest {
                descriptor,
                service,
                image,
                timeout,
                rollback,
            };
            commands::deploy::deploy(&settings, request).await
        }
        Commands::History {
            service,
            limit,
            format,
        } => {
            commands::history::history(&settings, &service, limit, format == OutputFormat::Json)?;
            Ok(0)
        }
        Commands::Init { service, out, force } => {
            commands::init::init(&service, &out, force)?;
            Ok(0)
        }
    }
}
