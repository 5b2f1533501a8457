//! Diagnostic and error reporting utilities

use crate::config::DiagnosticFormat;
use crate::{BuildError, CliError, Result};
use lanec_core::diagnostics::DiagnosticManager;
use miette::Diagnostic;
use thiserror::Error;

/// Set up enhanced error reporting with miette
pub fn setup_error_reporting() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(false)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .map_err(|e| CliError::Config(format!("Failed to setup error reporting: {}", e)))?;

    Ok(())
}

/// Errors that end a `lanec` invocation, as shown to the user.
#[derive(Error, Debug, Diagnostic)]
pub enum LanecError {
    #[error("{message}")]
    #[diagnostic(
        code(lanec::invalid_options),
        help("Run `lanec compile --help` for the accepted option combinations")
    )]
    InvalidOptions { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(lanec::unknown_target),
        help("Run `lanec targets` to list the supported targets")
    )]
    UnknownTarget { message: String },

    #[error("{message}")]
    #[diagnostic(code(lanec::compilation_failed))]
    CompilationFailed { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(lanec::config_error),
        help("Check your lanec.toml file for correct syntax and values")
    )]
    ConfigError { message: String },
}

impl LanecError {
    /// Reporting form of a CLI error, if it has one.
    pub fn from_cli_error(error: &CliError) -> Option<Self> {
        let message = error.to_string();
        match error {
            CliError::Build(BuildError::Config(_)) => Some(LanecError::InvalidOptions { message }),
            CliError::Build(BuildError::Target(_)) => Some(LanecError::UnknownTarget { message }),
            CliError::Build(BuildError::Compile { .. }) => {
                Some(LanecError::CompilationFailed { message })
            }
            CliError::Config(_) => Some(LanecError::ConfigError { message }),
            _ => None,
        }
    }
}

/// Print an error through miette. Returns false when the error has no
/// reporting form and should be logged instead.
pub fn render_cli_error(error: &CliError) -> bool {
    match LanecError::from_cli_error(error) {
        Some(report) => {
            eprintln!("{:?}", miette::Report::new(report));
            true
        }
        None => false,
    }
}

/// Print the diagnostics a build collected.
pub fn emit_build_diagnostics(
    diagnostics: &DiagnosticManager,
    format: DiagnosticFormat,
    context: &str,
    verbose: bool,
) {
    DiagnosticManager::emit(
        &diagnostics.get_diagnostics(),
        Some(context),
        &format.display_options(verbose),
    );
}
