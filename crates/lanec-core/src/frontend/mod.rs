pub mod snapshot;

use crate::diagnostics::DiagnosticReport;
use crate::lir::LirProgram;
use crate::span::SourcePos;
use crate::target::Target;
use crate::types::{FunctionType, Type, TypeRegistry};
use std::collections::BTreeSet;
use std::path::Path;

pub use snapshot::SnapshotFrontend;

/// Explicit context of one target pass. Created by the driver for a pass and
/// dropped when the pass ends.
#[derive(Debug, Clone)]
pub struct TargetContext {
    target: Target,
    mangle_exports: bool,
}

impl TargetContext {
    pub fn new(target: Target, mangle_exports: bool) -> Self {
        Self {
            target,
            mangle_exports,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn mangles_exports(&self) -> bool {
        self.mangle_exports
    }

    /// Link name of an exported function in this pass: `name_<isa>` when
    /// several targets are built, the plain name otherwise.
    pub fn symbol_name(&self, name: &str) -> String {
        if self.mangle_exports {
            format!("{}_{}", name, self.target.isa_name())
        } else {
            name.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSymbol {
    /// Name in the program text.
    pub name: String,
    /// Name of the LIR function.
    pub symbol: String,
    pub ty: FunctionType,
    pub pos: SourcePos,
}

impl FunctionSymbol {
    pub fn is_exported(&self) -> bool {
        self.ty.is_exported
    }

    pub fn is_extern_c(&self) -> bool {
        self.ty.is_extern_c
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSymbol {
    pub name: String,
    pub ty: Type,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    pub functions: Vec<FunctionSymbol>,
    pub globals: Vec<GlobalSymbol>,
}

impl SymbolTable {
    pub fn function(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.iter().find(|func| func.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalSymbol> {
        self.globals.iter().find(|global| global.name == name)
    }

    pub fn exported_functions(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.functions.iter().filter(|func| func.is_exported())
    }

    pub fn extern_c_functions(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.functions.iter().filter(|func| func.is_extern_c())
    }
}

/// Result of compiling a program for one target.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub program: LirProgram,
    pub symbols: SymbolTable,
    pub types: TypeRegistry,
    /// Types the program asked to appear in generated headers.
    pub exported_types: Vec<Type>,
    /// Files the program text was assembled from, for dependency output.
    pub dependencies: BTreeSet<String>,
}

/// Trait implemented by every source-language frontend.
pub trait LanguageFrontend: Send + Sync {
    fn language(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];
    fn compile(
        &self,
        source: &str,
        path: Option<&Path>,
        ctx: &TargetContext,
    ) -> DiagnosticReport<CompiledModule>;
}
