//! lanec CLI Library
//!
//! Argument handling, configuration files and diagnostic rendering for the
//! `lanec` binary. The compilation itself lives in `lanec-backend`.

pub mod commands;
pub mod config;
pub mod diagnostics;

pub use lanec_backend::{BuildError, BuildRequest, OutputType};

// CLI-specific error handling
pub mod error {
    use lanec_backend::BuildError;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum CliError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error(transparent)]
        Build(#[from] BuildError),

        #[error("Invalid input: {0}")]
        InvalidInput(String),
    }

    impl CliError {
        /// Process exit status for this failure.
        pub fn exit_code(&self) -> i32 {
            match self {
                CliError::Build(err) => err.exit_code(),
                _ => 1,
            }
        }
    }

    impl From<eyre::Report> for CliError {
        fn from(err: eyre::Report) -> Self {
            CliError::Config(format!("{:#}", err))
        }
    }

    pub type Result<T> = std::result::Result<T, CliError>;
}

pub use error::{CliError, Result};
