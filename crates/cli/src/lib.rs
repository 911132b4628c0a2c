pub mod commands;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use launchpad_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "launchpad",
    about = "Launchpad operator CLI",
    long_about = "Validate agent output, inspect usage quotas, and operate the counter store.",
    after_help = "Examples:\n  launchpad doctor --json\n  launchpad parse --kind plan --file response.txt\n  launchpad check founder-1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM readiness, DB connectivity and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Extract, validate and normalize a raw agent response")]
    Parse {
        #[arg(long, help = "Agent kind: execution_planner (plan) or grant_scout (grants)")]
        kind: String,
        #[arg(long, help = "Read the response from a file instead of stdin")]
        file: Option<PathBuf>,
    },
    #[command(about = "Show current usage for every quota without consuming")]
    Usage { subject: String },
    #[command(about = "Run the free tier gate for a subject, consuming one request")]
    Check { subject: String },
    #[command(about = "Delete counter windows past the retention period")]
    Sweep,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the command payload.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => {
            let (output, passed) = commands::doctor::run(json);
            commands::CommandResult { exit_code: if passed { 0 } else { 1 }, output }
        }
        Command::Parse { kind, file } => commands::parse::run(&kind, file.as_deref()),
        Command::Usage { subject } => commands::usage::run(&subject),
        Command::Check { subject } => commands::check::run(&subject),
        Command::Sweep => commands::sweep::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter).with_writer(io::stderr);

    // A subscriber may already be installed when embedded in tests.
    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
