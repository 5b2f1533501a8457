//! Code generation backends.
//!
//! A backend turns a verified LIR module into the bytes of one artifact. The
//! build only talks to backends through [`CodegenBackend`].

use crate::error::{BuildError, Result};
use crate::options::OutputType;
use lanec_core::lir::verify::{verify_program, VerifyError};
use lanec_core::lir::LirProgram;
use lanec_core::pretty::{pretty, PrettyOptions};
use lanec_core::target::Target;
use std::io::Write;
use tracing::warn;

pub trait CodegenBackend {
    fn name(&self) -> &'static str;

    fn verify(&self, program: &LirProgram) -> std::result::Result<(), Vec<VerifyError>>;

    fn emit(
        &self,
        program: &LirProgram,
        target: &Target,
        kind: OutputType,
        sink: &mut dyn Write,
    ) -> Result<()>;
}

/// Backend writing the textual LIR form for every artifact kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextualBackend;

impl TextualBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CodegenBackend for TextualBackend {
    fn name(&self) -> &'static str {
        "textual"
    }

    fn verify(&self, program: &LirProgram) -> std::result::Result<(), Vec<VerifyError>> {
        verify_program(program)
    }

    fn emit(
        &self,
        program: &LirProgram,
        target: &Target,
        kind: OutputType,
        sink: &mut dyn Write,
    ) -> Result<()> {
        match kind {
            OutputType::BitcodeText => {}
            OutputType::Asm | OutputType::Bitcode | OutputType::Object => {
                warn!(
                    "{} backend renders {} output for {} as textual IR",
                    self.name(),
                    kind.description(),
                    target.name()
                );
            }
            OutputType::Cxx => {
                return Err(BuildError::Unsupported(format!(
                    "the {} backend cannot emit C++ source",
                    self.name()
                )))
            }
            other => {
                return Err(BuildError::Unsupported(format!(
                    "{} output is not produced by a code generation backend",
                    other.description()
                )))
            }
        }

        write!(sink, "{}", pretty(program, PrettyOptions::default()))
            .map_err(|err| BuildError::Codegen(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanec_core::lir::{LirConstant, LirGlobal, Ty};

    #[test]
    fn textual_backend_prints_the_module() {
        let target = Target::new(None, None, Some("sse2"), false).unwrap();
        let mut program =
            LirProgram::new("m").with_target(target.triple(), target.data_layout());
        program.add_global(
            LirGlobal::new("counter", Ty::I32).with_initializer(LirConstant::Int(5, Ty::I32)),
        );

        let mut out = Vec::new();
        TextualBackend::new()
            .emit(&program, &target, OutputType::Object, &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("; ModuleID = 'm'"));
        assert!(text.contains("@counter = global i32 5"));
    }

    #[test]
    fn cxx_and_non_code_outputs_are_rejected() {
        let target = Target::new(None, None, Some("generic-4"), false).unwrap();
        let program = LirProgram::new("m");
        let mut out = Vec::new();
        let backend = TextualBackend::new();
        assert!(matches!(
            backend.emit(&program, &target, OutputType::Cxx, &mut out),
            Err(BuildError::Unsupported(_))
        ));
        assert!(matches!(
            backend.emit(&program, &target, OutputType::Header, &mut out),
            Err(BuildError::Unsupported(_))
        ));
        assert!(out.is_empty());
    }
}
