//! Frontend reading a type-checked program snapshot.
//!
//! The snapshot is the JSON form of a program after parsing and type
//! checking: struct and enum definitions, globals with their initializers,
//! and function signatures. Statement code generation happens elsewhere; the
//! functions lowered here return the zero value of their return type.

use super::{
    CompiledModule, FunctionSymbol, GlobalSymbol, LanguageFrontend, SymbolTable, TargetContext,
};
use crate::diagnostics::{Diagnostic, DiagnosticReport};
use crate::lir::{
    CallingConvention, LirBasicBlock, LirConstant, LirFunction, LirFunctionSignature, LirGlobal,
    LirProgram, LirTerminator, LirValue, Linkage, Ty,
};
use crate::span::SourcePos;
use crate::types::{EnumType, FunctionType, Lowering, StructType, Type, TypeRegistry};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramSnapshot {
    #[serde(default)]
    pub structs: Vec<StructType>,
    #[serde(default)]
    pub enums: Vec<EnumType>,
    #[serde(default)]
    pub globals: Vec<GlobalDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
    #[serde(default)]
    pub exported_types: Vec<Type>,
    /// Files pulled in while preprocessing.
    #[serde(default)]
    pub includes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Initializer {
    Bool(bool),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default)]
    pub init: Option<Initializer>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_extern: bool,
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FunctionType,
    /// Prototype only, e.g. an `extern "C"` function implemented in C.
    #[serde(default)]
    pub is_declaration: bool,
    #[serde(default)]
    pub pos: SourcePos,
}

pub fn load_snapshot_from_file(path: &Path) -> Result<ProgramSnapshot> {
    let contents = fs::read_to_string(path)?;
    load_snapshot_from_str(&contents)
}

pub fn load_snapshot_from_str(contents: &str) -> Result<ProgramSnapshot> {
    Ok(serde_json::from_str(contents)?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotFrontend;

impl SnapshotFrontend {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageFrontend for SnapshotFrontend {
    fn language(&self) -> &'static str {
        "lanec-snapshot"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn compile(
        &self,
        source: &str,
        path: Option<&Path>,
        ctx: &TargetContext,
    ) -> DiagnosticReport<CompiledModule> {
        let context = path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<stdin>".to_string());
        match load_snapshot_from_str(source) {
            Ok(snapshot) => lower_snapshot(snapshot, path, ctx),
            Err(err) => crate::diagnostic_error!(context, "failed to read program snapshot: {}", err),
        }
    }
}

fn module_name(path: Option<&Path>) -> String {
    path.and_then(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stdin".to_string())
}

/// Lowers a snapshot for the target of `ctx`.
pub fn lower_snapshot(
    snapshot: ProgramSnapshot,
    path: Option<&Path>,
    ctx: &TargetContext,
) -> DiagnosticReport<CompiledModule> {
    let target = ctx.target();
    let mut diagnostics = Vec::new();

    let mut types = TypeRegistry::new();
    for def in &snapshot.structs {
        types.add_struct(def.clone());
    }
    for def in &snapshot.enums {
        types.add_enum(def.clone());
    }

    check_type_names(&snapshot, &types, &mut diagnostics);
    for func in snapshot.functions.iter().filter(|func| func.ty.is_exported) {
        check_export(func, &mut diagnostics);
    }
    if diagnostics.iter().any(Diagnostic::is_error) {
        return DiagnosticReport::failure(diagnostics);
    }

    let mut program =
        LirProgram::new(module_name(path)).with_target(target.triple(), target.data_layout());
    let mut symbols = SymbolTable::default();
    let mut lowering = Lowering::new(target, &types);

    for global in &snapshot.globals {
        let ty = lowering.lower(&global.ty, &mut program);
        let mut lir = LirGlobal::new(&global.name, ty.clone()).constant(global.is_const);
        if !global.is_extern {
            let init = match &global.init {
                Some(init) => initializer_constant(init, &ty),
                None => Some(LirConstant::Zero(ty.clone())),
            };
            match init {
                Some(init) => lir = lir.with_initializer(init),
                None => {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "Initializer for global \"{}\" does not match its type \"{}\"",
                            global.name, global.ty
                        ))
                        .with_pos(global.pos.clone()),
                    );
                    continue;
                }
            }
        }
        if global.is_static {
            lir = lir.with_linkage(Linkage::Internal);
        }
        program.add_global(lir);
        symbols.globals.push(GlobalSymbol {
            name: global.name.clone(),
            ty: global.ty.clone(),
            pos: global.pos.clone(),
        });
    }

    for func in &snapshot.functions {
        let params = func
            .ty
            .param_types()
            .map(|ty| lowering.lower(ty, &mut program))
            .collect::<Vec<_>>();
        let return_type = lowering.lower(&func.ty.return_type, &mut program);
        let public = func.ty.is_exported || func.ty.is_extern_c;
        let symbol = if func.ty.is_exported && !func.ty.is_extern_c {
            ctx.symbol_name(&func.name)
        } else {
            func.name.clone()
        };

        let mut lir = LirFunction::new(
            symbol.clone(),
            LirFunctionSignature::new(params, return_type.clone()),
            CallingConvention::C,
            if public {
                Linkage::External
            } else {
                Linkage::Internal
            },
        )
        .with_param_names(func.ty.params.iter().map(|param| param.name.clone()));
        if !func.is_declaration {
            let mut entry = LirBasicBlock::new(0, Some("entry".into()));
            entry.set_terminator(LirTerminator::Return(zero_return(&return_type)));
            lir.add_basic_block(entry);
        }
        program.add_function(lir);
        symbols.functions.push(FunctionSymbol {
            name: func.name.clone(),
            symbol,
            ty: func.ty.clone(),
            pos: func.pos.clone(),
        });
    }

    if diagnostics.iter().any(Diagnostic::is_error) {
        return DiagnosticReport::failure(diagnostics);
    }

    let mut dependencies = snapshot.includes.into_iter().collect::<BTreeSet<_>>();
    if let Some(path) = path {
        dependencies.insert(path.display().to_string());
    }

    tracing::debug!(
        "lowered {} globals and {} functions for {}",
        program.globals.len(),
        program.functions.len(),
        target.name()
    );
    DiagnosticReport::success_with_diagnostics(
        CompiledModule {
            program,
            symbols,
            types,
            exported_types: snapshot.exported_types,
            dependencies,
        },
        diagnostics,
    )
}

fn zero_return(ty: &Ty) -> Option<LirValue> {
    if ty.is_void() {
        None
    } else {
        Some(LirValue::Constant(LirConstant::Zero(ty.clone())))
    }
}

fn initializer_constant(init: &Initializer, ty: &Ty) -> Option<LirConstant> {
    match (init, ty) {
        (Initializer::Int(value), Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64 | Ty::I128) => {
            Some(LirConstant::Int(*value, ty.clone()))
        }
        (Initializer::Bool(value), Ty::I1 | Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64) => {
            Some(LirConstant::Int(i64::from(*value), ty.clone()))
        }
        (Initializer::Int(value), Ty::I1) => Some(LirConstant::Int(i64::from(*value != 0), Ty::I1)),
        (Initializer::Float(value), Ty::F32 | Ty::F64) => {
            Some(LirConstant::Float(*value, ty.clone()))
        }
        (Initializer::Int(value), Ty::F32 | Ty::F64) => {
            Some(LirConstant::Float(*value as f64, ty.clone()))
        }
        // varying globals start with every lane set to the initializer
        (init, Ty::Vector(element, lanes)) => {
            let lane = initializer_constant(init, element)?;
            Some(LirConstant::Vector(vec![lane; *lanes as usize], ty.clone()))
        }
        _ => None,
    }
}

fn check_type_names(
    snapshot: &ProgramSnapshot,
    types: &TypeRegistry,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut check = |ty: &Type, pos: &SourcePos| {
        let mut structs = Vec::new();
        ty.referenced_structs(&mut structs);
        for name in structs {
            if types.get_struct(name).is_none() {
                diagnostics.push(
                    Diagnostic::error(format!("Undefined struct type \"{}\"", name))
                        .with_pos(pos.clone()),
                );
            }
        }
    };

    let unknown = SourcePos::default();
    for def in &types.structs {
        for field in &def.fields {
            check(&field.ty, &unknown);
        }
    }
    for global in &snapshot.globals {
        check(&global.ty, &global.pos);
    }
    for func in &snapshot.functions {
        check(&func.ty.return_type, &func.pos);
        for param in &func.ty.params {
            check(&param.ty, &func.pos);
        }
    }
    for ty in &snapshot.exported_types {
        check(ty, &unknown);
    }
}

/// Exported functions are called from C, which has no notion of lanes: no
/// varying values and no structs by value cross the boundary.
fn check_export(func: &FunctionDecl, diagnostics: &mut Vec<Diagnostic>) {
    let mut error = |message: String| {
        diagnostics.push(Diagnostic::error(message).with_pos(func.pos.clone()));
    };

    // extern "C" keeps the bare name in every target, so no dispatch entry can own it
    if func.ty.is_extern_c {
        error(format!(
            "Illegal to declare exported function \"{}\" as extern \"C\"",
            func.name
        ));
    }

    for param in &func.ty.params {
        let ty = &param.ty;
        if ty.is_varying() && !ty.is_reference() {
            error(format!(
                "Illegal to use \"varying\" parameter type \"{}\" for parameter \"{}\" of exported function \"{}\"",
                ty, param.name, func.name
            ));
        } else if ty.is_struct() {
            error(format!(
                "Illegal to pass struct \"{}\" by value to exported function \"{}\"",
                param.name, func.name
            ));
        }
    }

    let ret = &func.ty.return_type;
    if ret.is_varying() {
        error(format!(
            "Illegal to return a \"varying\" type from exported function \"{}\"",
            func.name
        ));
    } else if ret.is_struct() {
        error(format!(
            "Illegal to return struct type from exported function \"{}\"",
            func.name
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Target;

    const SCALE: &str = r#"{
        "globals": [
            {"name": "counter", "type": {"kind": "atomic", "atomic": "int32"}, "init": 5},
            {"name": "hidden", "type": {"kind": "atomic", "atomic": "float"}, "is_static": true},
            {"name": "lanes", "type": {"kind": "atomic", "atomic": "int32", "variability": "varying"}, "init": 1}
        ],
        "functions": [
            {
                "name": "scale",
                "type": {
                    "return_type": {"kind": "atomic", "atomic": "void"},
                    "params": [{"name": "p", "type": {"kind": "pointer", "pointee": {"kind": "atomic", "atomic": "float", "variability": "varying"}}}],
                    "is_exported": true
                },
                "pos": {"file": "scale.lc", "line": 3, "column": 1}
            },
            {
                "name": "helper",
                "type": {"return_type": {"kind": "atomic", "atomic": "int32"}}
            }
        ],
        "includes": ["common.lch"]
    }"#;

    fn compile(source: &str, target: &str, mangle: bool) -> DiagnosticReport<CompiledModule> {
        let target = Target::new(None, None, Some(target), false).unwrap();
        SnapshotFrontend::new().compile(
            source,
            Some(Path::new("scale.json")),
            &TargetContext::new(target, mangle),
        )
    }

    #[test]
    fn lowers_globals_and_exports_for_the_target() {
        let (module, diagnostics) = compile(SCALE, "avx2", true).into_result().unwrap();
        assert!(diagnostics.is_empty());
        let program = &module.program;

        let counter = program.global("counter").unwrap();
        assert_eq!(counter.initializer, Some(LirConstant::Int(5, Ty::I32)));
        assert_eq!(counter.linkage, Linkage::External);
        assert_eq!(program.global("hidden").unwrap().linkage, Linkage::Internal);
        assert_eq!(
            program.global("lanes").unwrap().ty,
            Ty::Vector(Box::new(Ty::I32), 8)
        );

        let scale = program.function("scale_avx2").unwrap();
        assert_eq!(
            scale.signature.params,
            vec![Ty::ptr(Ty::Vector(Box::new(Ty::F32), 8))]
        );
        assert!(!scale.is_declaration());
        assert_eq!(program.function("helper").unwrap().linkage, Linkage::Internal);

        let symbol = module.symbols.function("scale").unwrap();
        assert_eq!(symbol.symbol, "scale_avx2");
        assert!(symbol.is_exported());
        assert_eq!(
            module.dependencies.iter().collect::<Vec<_>>(),
            vec!["common.lch", "scale.json"]
        );
        assert_eq!(crate::lir::verify::verify_program(program), Ok(()));
    }

    #[test]
    fn single_target_exports_keep_their_name() {
        let (module, _) = compile(SCALE, "sse2", false).into_result().unwrap();
        assert!(module.program.function("scale").is_some());
    }

    #[test]
    fn rejects_varying_parameters_and_struct_returns() {
        let source = r#"{
            "structs": [{"name": "P", "fields": []}],
            "functions": [
                {"name": "f", "type": {
                    "return_type": {"kind": "struct", "name": "P"},
                    "params": [{"name": "x", "type": {"kind": "atomic", "atomic": "float", "variability": "varying"}}],
                    "is_exported": true
                }}
            ]
        }"#;
        let report = compile(source, "sse2", true);
        assert_eq!(report.error_count(), 2);
        let messages = report
            .diagnostics
            .iter()
            .map(|diag| diag.message.clone())
            .collect::<Vec<_>>();
        assert!(messages[0].contains("\"varying\" parameter type"));
        assert!(messages[1].contains("Illegal to return struct type"));
    }

    #[test]
    fn exported_functions_cannot_be_extern_c() {
        let source = r#"{"functions": [{"name": "f", "type": {
            "return_type": {"kind": "atomic", "atomic": "void"},
            "is_exported": true,
            "is_extern_c": true
        }}]}"#;
        let report = compile(source, "avx2", true);
        assert!(report.value.is_none());
        assert_eq!(report.error_count(), 1);
        assert_eq!(
            report.diagnostics[0].message,
            "Illegal to declare exported function \"f\" as extern \"C\""
        );

        let plain = r#"{"functions": [{"name": "f", "type": {
            "return_type": {"kind": "atomic", "atomic": "void"},
            "is_extern_c": true
        }}]}"#;
        let (module, _) = compile(plain, "avx2", true).into_result().unwrap();
        assert!(module.program.function("f").is_some());
    }

    #[test]
    fn reports_undefined_structs_and_bad_snapshots() {
        let source = r#"{"globals": [{"name": "g", "type": {"kind": "struct", "name": "Nope"}}]}"#;
        let report = compile(source, "sse2", false);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.diagnostics[0].message, "Undefined struct type \"Nope\"");

        let report = compile("{ not json", "sse2", false);
        assert!(report.value.is_none());
        assert!(report.diagnostics[0]
            .message
            .starts_with("failed to read program snapshot"));
    }

    #[test]
    fn mismatched_initializers_are_errors() {
        let source = r#"{"globals": [{"name": "g", "type": {"kind": "pointer", "pointee": {"kind": "atomic", "atomic": "float"}}, "init": 1.5}]}"#;
        let report = compile(source, "sse2", false);
        assert_eq!(report.error_count(), 1);
        assert!(report.diagnostics[0].message.contains("does not match its type"));
    }
}
