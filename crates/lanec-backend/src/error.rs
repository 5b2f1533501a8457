use lanec_core::target::TargetError;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    /// Invalid combination of build options, detected before compiling.
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("unable to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{errors} error(s) during compilation")]
    Compile { errors: usize },
    #[error("code generation failed: {0}")]
    Codegen(String),
    #[error("{0}")]
    Unsupported(String),
}

impl BuildError {
    pub fn config(message: impl Into<String>) -> Self {
        BuildError::Config(message.into())
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn read(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        BuildError::Read {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
