//! Compilation command implementation

use crate::config::{CliConfig, DiagnosticFormat};
use crate::diagnostics::emit_build_diagnostics;
use crate::{CliError, Result};
use clap::{Args, ValueEnum};
use console::style;
use lanec_backend::{BuildRequest, Driver, OutputFlags, OutputType};
use std::path::PathBuf;
use tracing::{debug, info, info_span, warn};

/// Code kinds selectable with `--emit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmitKind {
    /// Target assembly
    Asm,
    /// LLVM bitcode
    Llvm,
    /// LLVM assembly text
    LlvmText,
    /// Object file
    Obj,
    /// C++ source, generic targets only
    #[value(name = "c++")]
    Cxx,
}

impl From<EmitKind> for OutputType {
    fn from(kind: EmitKind) -> Self {
        match kind {
            EmitKind::Asm => OutputType::Asm,
            EmitKind::Llvm => OutputType::Bitcode,
            EmitKind::LlvmText => OutputType::BitcodeText,
            EmitKind::Obj => OutputType::Object,
            EmitKind::Cxx => OutputType::Cxx,
        }
    }
}

/// Arguments for the compile command
#[derive(Debug, Clone, Args)]
pub struct CompileArgs {
    /// Program to compile, a typed-program snapshot; `-` or nothing reads stdin
    pub input: Option<PathBuf>,

    /// Target architecture
    #[arg(long)]
    pub arch: Option<String>,

    /// CPU to generate code for
    #[arg(long)]
    pub cpu: Option<String>,

    /// Target, or a comma separated list of targets for a dispatching build
    #[arg(long)]
    pub target: Option<String>,

    /// Kind of code written to the output file
    #[arg(long, value_enum, default_value = "obj")]
    pub emit: EmitKind,

    /// Output file; `-` writes to stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Header file declaring the exported functions and types
    #[arg(short = 'H', long)]
    pub header: Option<PathBuf>,

    /// Write the source dependencies to this file
    #[arg(long)]
    pub deps: Option<PathBuf>,

    /// Write the source dependencies to stdout
    #[arg(long)]
    pub deps_stdout: bool,

    /// Write dependencies as a Make rule instead of a flat list
    #[arg(long)]
    pub make_rule: bool,

    /// Target name of the Make rule
    #[arg(long)]
    pub deps_target: Option<String>,

    /// Host-side offload stub file
    #[arg(long)]
    pub host_stub: Option<PathBuf>,

    /// Device-side offload stub file
    #[arg(long)]
    pub dev_stub: Option<PathBuf>,

    /// Header included by C++ output
    #[arg(long = "c++-include-file")]
    pub cxx_include_file: Option<PathBuf>,

    /// Generate position independent code
    #[arg(long)]
    pub pic: bool,

    /// Use an include guard instead of `#pragma once` in headers
    #[arg(long)]
    pub no_pragma_once: bool,

    /// Declare the instrumentation hook in headers
    #[arg(long)]
    pub instrument: bool,

    /// How diagnostics are printed
    #[arg(long, value_enum)]
    pub diagnostics: Option<DiagnosticFormat>,
}

impl CompileArgs {
    /// Translate the arguments into a build request, filling unset options
    /// from the configuration.
    pub fn build_request(&self, config: &CliConfig) -> BuildRequest {
        let mut request = BuildRequest::new(self.input.clone());
        request.arch = self.arch.clone().or_else(|| config.arch.clone());
        request.cpu = self.cpu.clone();
        request.targets = self.target.clone().or_else(|| config.target.clone());
        request.output_type = self.emit.into();
        request.out_file = self.output.clone();
        request.header_file = self.header.clone();
        request.include_file = self.cxx_include_file.clone();
        request.deps_file = self.deps.clone();
        request.deps_target = self.deps_target.clone();
        request.host_stub_file = self.host_stub.clone();
        request.dev_stub_file = self.dev_stub.clone();
        request.flags = OutputFlags {
            pic: self.pic,
            pragma_once: !self.no_pragma_once && config.pragma_once.unwrap_or(true),
            make_rule_deps: self.make_rule,
            flat_deps: !self.make_rule && (self.deps.is_some() || self.deps_stdout),
            deps_to_stdout: self.deps_stdout,
            instrument: self.instrument,
        };
        request
    }

    fn requests_output(&self) -> bool {
        self.output.is_some()
            || self.header.is_some()
            || self.deps.is_some()
            || self.deps_stdout
            || self.host_stub.is_some()
            || self.dev_stub.is_some()
    }
}

/// Execute the compile command
pub fn compile_command(args: CompileArgs, config: &CliConfig, verbose: bool) -> Result<()> {
    let request = args.build_request(config);
    let input_name = match request.source_path() {
        Some(path) => path.display().to_string(),
        None => "<stdin>".to_string(),
    };
    let span = info_span!("compile", input = %input_name);
    let _enter = span.enter();

    if !args.requests_output() {
        warn!(
            "No output file or header file name specified. Program will be compiled and \
             warnings/errors will be issued, but no output will be generated."
        );
    }
    if args.make_rule && args.deps.is_none() && !args.deps_stdout {
        return Err(CliError::InvalidInput(
            "--make-rule needs --deps or --deps-stdout".to_string(),
        ));
    }

    let driver = Driver::default();
    let result = driver.run(&request);
    let format = args
        .diagnostics
        .or(config.diagnostic_format)
        .unwrap_or_default();
    emit_build_diagnostics(driver.diagnostics(), format, &input_name, verbose);

    let outcome = result?;
    for artifact in &outcome.artifacts {
        debug!("wrote {}", artifact.display());
    }
    info!(
        "{} compiled {} for {}",
        style("✓").green(),
        input_name,
        outcome.targets.join(", ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: CompileArgs,
    }

    fn parse(argv: &[&str]) -> CompileArgs {
        let mut full = vec!["lanec"];
        full.extend_from_slice(argv);
        Harness::parse_from(full).args
    }

    #[test]
    fn test_flags_map_onto_the_request() {
        let args = parse(&[
            "scale.json",
            "--target",
            "sse2,avx2",
            "--emit",
            "llvm-text",
            "-o",
            "scale.ll",
            "-H",
            "scale.h",
            "--deps",
            "scale.d",
            "--make-rule",
            "--no-pragma-once",
        ]);
        let request = args.build_request(&CliConfig::default());
        assert_eq!(request.source, Some(PathBuf::from("scale.json")));
        assert_eq!(request.targets.as_deref(), Some("sse2,avx2"));
        assert_eq!(request.output_type, OutputType::BitcodeText);
        assert_eq!(request.header_file, Some(PathBuf::from("scale.h")));
        assert!(request.flags.make_rule_deps);
        assert!(!request.flags.flat_deps);
        assert!(!request.flags.pragma_once);
    }

    #[test]
    fn test_config_fills_unset_options() {
        let config = CliConfig {
            arch: Some("x86".into()),
            target: Some("sse4".into()),
            pragma_once: Some(false),
            ..CliConfig::default()
        };
        let request = parse(&["scale.json", "--target", "avx2"]).build_request(&config);
        assert_eq!(request.arch.as_deref(), Some("x86"));
        assert_eq!(request.targets.as_deref(), Some("avx2"));
        assert!(!request.flags.pragma_once);
        assert_eq!(request.output_type, OutputType::Object);
    }

    #[test]
    fn test_cxx_emit_and_stdin() {
        let args = parse(&["--emit", "c++", "--c++-include-file", "lanes.h"]);
        let request = args.build_request(&CliConfig::default());
        assert_eq!(request.output_type, OutputType::Cxx);
        assert!(request.reads_stdin());
        assert_eq!(request.include_file, Some(PathBuf::from("lanes.h")));
    }
}
