//! lanec CLI Binary
//!
//! Compiles typed SPMD programs for one or more x86 targets. With several
//! targets each exported function is compiled once per ISA and a dispatch
//! function picks the best variant on the machine running the program.
//!
//! # Usage
//!
//! ```bash
//! # Compile for the host's best ISA
//! lanec compile scale.json -o scale.o -H scale.h
//!
//! # Compile variants for SSE2 and AVX2 plus a dispatching entry point
//! lanec compile scale.json --target sse2,avx2 -o scale.o -H scale.h
//!
//! # List the supported targets
//! lanec targets
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use lanec_cli::{
    commands::{self, compile::CompileArgs, targets::TargetsArgs},
    config::CliConfig,
    diagnostics::setup_error_reporting,
    Result,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "lanec",
    version = env!("CARGO_PKG_VERSION"),
    about = "lanec: multi-target SPMD compiler with runtime ISA dispatch",
    long_about = r#"
lanec compiles a typed SPMD program for one or several x86 vector targets.
Builds for several targets emit one variant per ISA and a dispatch module
that selects the most capable variant at run time.

EXAMPLES:
    lanec compile scale.json -o scale.o                      # Host target
    lanec compile scale.json --target sse2,avx2 -o scale.o   # Dispatching build
    lanec targets                                            # List targets
    "#
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use multiple times for increased verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Set log level (overrides --verbose/--quiet)
    #[arg(long, global = true, value_enum)]
    log: Option<LogLevel>,

    /// Set log output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    directory: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a program for one or more targets
    Compile(CompileArgs),

    /// List the supported compilation targets
    Targets(TargetsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_error_reporting()?;
    setup_logging(cli.verbose, cli.quiet, cli.log, cli.log_format)?;

    if let Some(dir) = &cli.directory {
        std::env::set_current_dir(dir).map_err(lanec_cli::CliError::Io)?;
    }

    let result = CliConfig::load(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Compile(args) => commands::compile_command(args, &config, cli.verbose > 0),
        Commands::Targets(args) => commands::targets_command(args),
    });

    match result {
        Ok(_) => {
            if cli.verbose > 0 {
                info!("Command completed successfully");
            }
            Ok(())
        }
        Err(e) => {
            use tracing::error;
            if !lanec_cli::diagnostics::render_cli_error(&e) {
                error!("{}", e);
            }
            if cli.verbose > 0 {
                error!(?e, "detailed error context");
            }
            std::process::exit(e.exit_code());
        }
    }
}

fn setup_logging(
    verbose: u8,
    quiet: bool,
    log_level: Option<LogLevel>,
    log_format: LogFormat,
) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if let Some(level) = log_level {
        EnvFilter::new(match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    } else if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // stdout may carry generated code or dependencies
    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_level(true);

    match log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(formatter)
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(formatter.json())
                .with(filter)
                .init();
        }
    }

    Ok(())
}
