//! The compilation driver.
//!
//! One target compiles and emits directly. Several targets run one pass
//! each, in capability order, feeding the export registry and the global
//! unifier; once every pass succeeded the dispatch module is synthesized and
//! written under the unsuffixed output name.

use crate::codegen::{CodegenBackend, TextualBackend};
use crate::dispatch::{init_dispatch_module, synthesize, DispatchPlan};
use crate::emit::{
    self, render_deps, render_dev_stub, render_header, render_host_stub, target_file_name,
    DepsFormat, DispatchHeader, HeaderOptions,
};
use crate::error::{BuildError, Result};
use crate::options::{BuildRequest, OutputType};
use crate::registry::ExportRegistry;
use crate::unify::unify_globals;
use itertools::Itertools;
use lanec_core::diagnostics::{Diagnostic, DiagnosticManager};
use lanec_core::frontend::{CompiledModule, LanguageFrontend, SnapshotFrontend, TargetContext};
use lanec_core::lir::LirProgram;
use lanec_core::target::Target;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

/// What a successful build produced.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    /// Names of the targets compiled, in pass order.
    pub targets: Vec<String>,
    /// Files written, in write order. Output sent to stdout is not listed.
    pub artifacts: Vec<PathBuf>,
    /// Dispatch decision tables of a multi-target build.
    pub dispatch_plans: Vec<DispatchPlan>,
}

impl BuildOutcome {
    fn wrote(&mut self, path: &Path) {
        if !emit::is_stdout(path) {
            self.artifacts.push(path.to_path_buf());
        }
    }
}

/// Splits a comma separated target list, trimming surrounding blanks.
/// Empty entries are kept so that they can be rejected.
pub fn parse_target_list(spec: &str) -> Vec<String> {
    spec.split(',').map(|name| name.trim().to_string()).collect()
}

/// Name of the Make rule target: the explicit name, else the output file,
/// else the source with an `.o` suffix, else `a.out`.
pub fn make_rule_target(request: &BuildRequest) -> String {
    if let Some(name) = &request.deps_target {
        return name.clone();
    }
    if let Some(out) = &request.out_file {
        return out.display().to_string();
    }
    match request.source_path() {
        Some(source) => source.with_extension("o").display().to_string(),
        None => "a.out".to_string(),
    }
}

pub struct Driver {
    frontend: Arc<dyn LanguageFrontend>,
    backend: Box<dyn CodegenBackend>,
    diagnostics: DiagnosticManager,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(Arc::new(SnapshotFrontend::new()), Box::new(TextualBackend::new()))
    }
}

impl Driver {
    pub fn new(frontend: Arc<dyn LanguageFrontend>, backend: Box<dyn CodegenBackend>) -> Self {
        Self {
            frontend,
            backend,
            diagnostics: DiagnosticManager::new(),
        }
    }

    /// Diagnostics reported so far, including those of a failed build.
    pub fn diagnostics(&self) -> &DiagnosticManager {
        &self.diagnostics
    }

    pub fn run(&self, request: &BuildRequest) -> Result<BuildOutcome> {
        if !request.output_type.is_code() {
            return Err(BuildError::config(format!(
                "{} files are requested with their own option, not as the output type",
                request.output_type.description()
            )));
        }
        match request.targets.as_deref() {
            Some(spec) if spec.contains(',') => {
                let targets = self.resolve_targets(request, &parse_target_list(spec))?;
                self.build_multi(request, targets)
            }
            spec => {
                let target = Target::new(
                    request.arch.as_deref(),
                    request.cpu.as_deref(),
                    spec.map(str::trim),
                    request.flags.pic,
                )?;
                self.build_single(request, target)
            }
        }
    }

    /// Checks a multi-target request and instantiates its targets, before
    /// anything is compiled or written.
    fn resolve_targets(&self, request: &BuildRequest, names: &[String]) -> Result<Vec<Target>> {
        if request.output_type == OutputType::Cxx {
            return Err(BuildError::config(
                "Illegal to specify more than one target when compiling C++ output.",
            ));
        }
        if request.reads_stdin() {
            return Err(BuildError::config(
                "Compiling programs from standard input isn't supported when compiling for \
                 multiple targets.  Please use an intermediate temporary file.",
            ));
        }
        if request.cpu.is_some() {
            return Err(BuildError::config(
                "Illegal to specify cpu type when compiling for multiple targets.",
            ));
        }
        if request.writes_stdout() {
            return Err(BuildError::config(
                "Multi-target compilation can't generate output to stdout.  Please provide an \
                 output filename.",
            ));
        }

        if names.iter().any(String::is_empty) {
            return Err(BuildError::config(format!(
                "Empty target name in target list \"{}\".",
                names.join(",")
            )));
        }

        let mut targets: Vec<Target> = Vec::with_capacity(names.len());
        for name in names {
            let target = Target::new(request.arch.as_deref(), None, Some(name), request.flags.pic)?;
            if target.is_generic() {
                return Err(BuildError::config(format!(
                    "Illegal to use \"generic-*\" target \"{}\" when compiling for multiple targets.",
                    name
                )));
            }
            if targets.iter().any(|seen| seen.isa() == target.isa()) {
                return Err(BuildError::config(format!(
                    "Can't compile to multiple variants of {} target!",
                    target.isa_name()
                )));
            }
            targets.push(target);
        }
        Ok(targets)
    }

    fn read_source(&self, request: &BuildRequest) -> Result<String> {
        let span = info_span!("driver.read_input");
        let _enter = span.enter();

        match request.source_path() {
            Some(path) => {
                debug!(path = %path.display(), "reading program");
                std::fs::read_to_string(path).map_err(|err| BuildError::read(path, err))
            }
            None => {
                let mut source = String::new();
                std::io::stdin()
                    .read_to_string(&mut source)
                    .map_err(|err| BuildError::read("<stdin>", err))?;
                Ok(source)
            }
        }
    }

    /// Runs the frontend for one target and verifies the module. Problems
    /// are recorded as diagnostics and yield `None`.
    fn compile_pass(
        &self,
        source: &str,
        request: &BuildRequest,
        ctx: &TargetContext,
    ) -> Option<CompiledModule> {
        let span = info_span!("driver.frontend", language = %self.frontend.language());
        let _enter = span.enter();

        let (module, diagnostics) = match self
            .frontend
            .compile(source, request.source_path(), ctx)
            .into_result()
        {
            Ok(compiled) => compiled,
            Err(diagnostics) => {
                self.diagnostics.add_diagnostics(diagnostics);
                return None;
            }
        };
        self.diagnostics.add_diagnostics(diagnostics);

        if let Err(errors) = self.backend.verify(&module.program) {
            for err in errors {
                self.diagnostics.error(Diagnostic::error(format!(
                    "module for target {} is malformed: {}",
                    ctx.target().name(),
                    err
                )));
            }
            return None;
        }
        Some(module)
    }

    fn compile_errors(&self) -> Result<()> {
        match self.diagnostics.error_count() {
            0 => Ok(()),
            errors => Err(BuildError::Compile { errors }),
        }
    }

    fn build_single(&self, request: &BuildRequest, target: Target) -> Result<BuildOutcome> {
        let span = info_span!("driver.target", target = %target.name());
        let _enter = span.enter();

        if request.output_type == OutputType::Cxx && !target.is_generic() {
            return Err(BuildError::config(
                "When generating C++ output, one of the \"generic-*\" targets must be used.",
            ));
        }
        if matches!(request.output_type, OutputType::Asm | OutputType::Object) && target.is_generic()
        {
            return Err(BuildError::config(format!(
                "When using a \"generic-*\" compilation target, {} output can not be used.",
                if request.output_type == OutputType::Asm {
                    "assembly"
                } else {
                    "object file"
                }
            )));
        }

        let source = self.read_source(request)?;
        let ctx = TargetContext::new(target.clone(), false);
        let module = self.compile_pass(&source, request, &ctx);
        self.compile_errors()?;
        let Some(module) = module else {
            return Err(BuildError::Compile { errors: 1 });
        };

        let mut outcome = BuildOutcome {
            targets: vec![target.name().to_string()],
            ..BuildOutcome::default()
        };
        if let Some(out) = &request.out_file {
            if request.output_type == OutputType::Cxx {
                if let Some(include) = &request.include_file {
                    debug!("C++ output would include {}", include.display());
                }
            }
            emit::write_output(
                self.backend.as_ref(),
                &module.program,
                &target,
                request.output_type,
                out,
                &self.diagnostics,
            )?;
            outcome.wrote(out);
        }
        if let Some(header) = &request.header_file {
            let text = render_header(
                &header.display().to_string(),
                &module,
                &target,
                &HeaderOptions::from(&request.flags),
            );
            emit::write_text(&text, OutputType::Header, header, &self.diagnostics)?;
            outcome.wrote(header);
        }
        self.write_deps(request, &module.dependencies, &mut outcome)?;
        if let Some(stub) = &request.host_stub_file {
            let text = render_host_stub(
                &stub.display().to_string(),
                &module,
                &target,
                &self.diagnostics,
            );
            emit::write_text(&text, OutputType::HostStub, stub, &self.diagnostics)?;
            outcome.wrote(stub);
        }
        if let Some(stub) = &request.dev_stub_file {
            let text = render_dev_stub(
                &stub.display().to_string(),
                &module,
                &target,
                &self.diagnostics,
            );
            emit::write_text(&text, OutputType::DevStub, stub, &self.diagnostics)?;
            outcome.wrote(stub);
        }

        self.compile_errors()?;
        info!("compiled for {}", target.name());
        Ok(outcome)
    }

    fn build_multi(&self, request: &BuildRequest, mut targets: Vec<Target>) -> Result<BuildOutcome> {
        let source = self.read_source(request)?;
        targets.sort_by_key(|target| target.isa().rank());
        info!(
            "compiling for {} targets: {}",
            targets.len(),
            targets.iter().map(Target::name).join(", ")
        );
        if request.host_stub_file.is_some() || request.dev_stub_file.is_some() {
            let message = "Offload stubs are only written when compiling for a single target.";
            warn!("{}", message);
            self.diagnostics.warning(Diagnostic::warning(message.to_string()));
        }

        let header_options = HeaderOptions::from(&request.flags);
        let mut dispatch_header = request
            .header_file
            .as_ref()
            .map(|header| DispatchHeader::new(header.display().to_string(), header_options));
        let mut registry = ExportRegistry::new();
        let mut modules: Vec<CompiledModule> = Vec::with_capacity(targets.len());
        let mut dispatch: Option<(Target, LirProgram)> = None;
        let mut outcome = BuildOutcome::default();

        for target in &targets {
            let span = info_span!("driver.target", target = %target.name());
            let _enter = span.enter();

            let ctx = TargetContext::new(target.clone(), true);
            let Some(mut module) = self.compile_pass(&source, request, &ctx) else {
                continue;
            };
            // after a failed pass the remaining ones only report diagnostics
            if self.diagnostics.has_errors() {
                debug!("skipping output for {} after earlier errors", target.name());
                continue;
            }

            let is_first_target = dispatch.is_none();
            let (_, dispatch_program) = dispatch.get_or_insert_with(|| {
                let dispatch_target = Target::for_isa(target.isa(), target.arch(), target.pic());
                let program = init_dispatch_module(&dispatch_target);
                (dispatch_target, program)
            });
            let unified = unify_globals(
                &mut module.program,
                &module.symbols,
                dispatch_program,
                is_first_target,
                &self.diagnostics,
            );
            let recorded = registry.record_module(modules.len(), target.isa(), &module);
            debug!(unified, recorded, "pass finished");

            let isa = target.isa().short_name();
            if let Some(out) = &request.out_file {
                let path = target_file_name(out, isa);
                emit::write_output(
                    self.backend.as_ref(),
                    &module.program,
                    target,
                    request.output_type,
                    &path,
                    &self.diagnostics,
                )?;
                outcome.wrote(&path);
            }
            if let Some(header) = &request.header_file {
                let path = target_file_name(header, isa);
                let text = render_header(
                    &path.display().to_string(),
                    &module,
                    target,
                    &header_options,
                );
                emit::write_text(&text, OutputType::Header, &path, &self.diagnostics)?;
                outcome.wrote(&path);
            }
            if let Some(header) = dispatch_header.as_mut() {
                header.add_target(&module, target);
            }

            outcome.targets.push(target.name().to_string());
            modules.push(module);
        }

        if let Err(err) = self.compile_errors() {
            error!("not synthesizing dispatch functions: {}", err);
            return Err(err);
        }
        let Some((dispatch_target, mut dispatch_program)) = dispatch else {
            return Err(BuildError::Codegen("no target produced a module".to_string()));
        };

        let span = info_span!("driver.dispatch", target = %dispatch_target.name());
        let _enter = span.enter();
        outcome.dispatch_plans = synthesize(&registry, &modules, &mut dispatch_program);

        if let Some(out) = &request.out_file {
            emit::write_output(
                self.backend.as_ref(),
                &dispatch_program,
                &dispatch_target,
                request.output_type,
                out,
                &self.diagnostics,
            )?;
            outcome.wrote(out);
        }
        if let (Some(path), Some(header)) = (&request.header_file, dispatch_header) {
            emit::write_text(&header.finish(), OutputType::Header, path, &self.diagnostics)?;
            outcome.wrote(path);
        }
        let dependencies = modules
            .iter()
            .flat_map(|module| module.dependencies.iter().cloned())
            .collect::<BTreeSet<_>>();
        self.write_deps(request, &dependencies, &mut outcome)?;

        self.compile_errors()?;
        Ok(outcome)
    }

    fn write_deps(
        &self,
        request: &BuildRequest,
        dependencies: &BTreeSet<String>,
        outcome: &mut BuildOutcome,
    ) -> Result<()> {
        let path = if request.flags.deps_to_stdout {
            PathBuf::from("-")
        } else {
            match &request.deps_file {
                Some(path) => path.clone(),
                None => return Ok(()),
            }
        };
        let format = if request.flags.make_rule_deps {
            DepsFormat::MakeRule {
                target: make_rule_target(request),
                source: request
                    .source_path()
                    .map(|source| source.display().to_string()),
            }
        } else {
            DepsFormat::Flat
        };
        emit::write_text(
            &render_deps(dependencies, &format),
            OutputType::Deps,
            &path,
            &self.diagnostics,
        )?;
        outcome.wrote(&path);
        Ok(())
    }
}

/// Runs a build with the snapshot frontend and the textual backend, and
/// returns the process exit status.
pub fn compile_and_output(request: &BuildRequest) -> i32 {
    let driver = Driver::default();
    match driver.run(request) {
        Ok(outcome) => {
            debug!("wrote {} artifact(s)", outcome.artifacts.len());
            0
        }
        Err(err) => {
            for diagnostic in driver.diagnostics().get_diagnostics() {
                if diagnostic.is_error() {
                    error!("{}", diagnostic);
                }
            }
            error!("{}", err);
            err.exit_code()
        }
    }
}
