//! CLI configuration loaded from `lanec.toml` files

use crate::Result;
use clap::ValueEnum;
use eyre::WrapErr;
use lanec_core::diagnostics::DiagnosticDisplayOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How compile diagnostics are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticFormat {
    #[default]
    Pretty,
    Plain,
}

impl DiagnosticFormat {
    pub fn display_options(self, verbose: bool) -> DiagnosticDisplayOptions {
        match self {
            DiagnosticFormat::Pretty => DiagnosticDisplayOptions::pretty(verbose),
            DiagnosticFormat::Plain => DiagnosticDisplayOptions::plain(verbose),
        }
    }
}

/// Defaults for command line options. Every field is optional; a flag given
/// on the command line always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Target architecture, `x86` or `x86-64`
    pub arch: Option<String>,

    /// Target list, comma separated
    pub target: Option<String>,

    /// Guard headers with `#pragma once`
    pub pragma_once: Option<bool>,

    pub diagnostic_format: Option<DiagnosticFormat>,
}

impl CliConfig {
    /// Load configuration from the given file, or merge the standard
    /// locations with the working directory taking precedence over the home
    /// directory, and the home directory over the system config directory.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let mut config = Self::default();
        for candidate in Self::search_paths().into_iter().rev() {
            if candidate.is_file() {
                debug!("loading configuration from {}", candidate.display());
                config = config.merge(Self::load_from_file(&candidate)?);
            }
        }
        Ok(config)
    }

    /// Standard locations, most specific first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("lanec.toml")];
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".lanec.toml"));
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("lanec").join("config.toml"));
        }
        paths
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Merge this configuration with another, with the other taking precedence
    pub fn merge(self, other: Self) -> Self {
        Self {
            arch: other.arch.or(self.arch),
            target: other.target.or(self.target),
            pragma_once: other.pragma_once.or(self.pragma_once),
            diagnostic_format: other.diagnostic_format.or(self.diagnostic_format),
        }
    }
}
