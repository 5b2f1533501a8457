//! Offload stubs: C++ glue that marshals the arguments of exported functions
//! into a parameter block on the host and unpacks them on the device.
//!
//! Pointer and array arguments travel separately from the parameter block,
//! so the runtime can translate them into device addresses.

use super::header::{exported_functions, without_const, ExportedTypes, SectionWriter};
use lanec_core::diagnostics::{Diagnostic, DiagnosticManager};
use lanec_core::frontend::{CompiledModule, FunctionSymbol};
use lanec_core::target::Target;
use lanec_core::types::cdecl::{CDecl, DeclForm};
use lanec_core::types::Type;
use tracing::warn;

const RULE: &str = "///////////////////////////////////////////////////////////////////////////\n";

fn banner(file_name: &str, out: &mut String) {
    out.push_str(&format!(
        "//\n// {}\n// (device stubs automatically generated by the lanec compiler.)\n",
        file_name
    ));
    out.push_str("// DO NOT EDIT THIS FILE.\n//\n\n");
}

fn passed_separately(ty: &Type) -> bool {
    ty.is_pointer() || ty.is_array()
}

fn param_struct_name(function: &FunctionSymbol) -> String {
    format!("__lanec_dev_stub_{}", function.name)
}

/// Exported functions that can be offloaded. Non-void functions are
/// skipped with a warning and non-const reference parameters reported as
/// errors.
fn offloadable<'a>(
    module: &'a CompiledModule,
    diagnostics: &DiagnosticManager,
) -> Vec<&'a FunctionSymbol> {
    let mut functions = Vec::new();
    for function in exported_functions(module) {
        if !function.ty.return_type.is_void() {
            let message =
                "When emitting offload-stubs, ignoring \"export\"ed function with non-void return types.";
            warn!("{}: {}", function.name, message);
            diagnostics.warning(Diagnostic::warning(message.to_string()).with_pos(function.pos.clone()));
            continue;
        }
        for param in &function.ty.params {
            if param.ty.is_reference() && !param.ty.is_const() {
                diagnostics.error(
                    Diagnostic::error(
                        "When emitting offload-stubs, \"export\"ed functions cannot have non-const reference-type parameters."
                            .to_string(),
                    )
                    .with_pos(function.pos.clone()),
                );
            }
        }
        functions.push(function);
    }
    functions
}

// const references are copied into the block by value
fn by_value(ty: &Type) -> Type {
    match ty {
        Type::Reference { target } => without_const(target),
        other => without_const(other),
    }
}

fn param_struct(decl: &CDecl, function: &FunctionSymbol, out: &mut String) {
    out.push_str(&format!("struct {} {{\n", param_struct_name(function)));
    for param in &function.ty.params {
        if passed_separately(&param.ty) {
            continue;
        }
        out.push_str(&format!("   {};\n", decl.declare(&by_value(&param.ty), &param.name)));
    }
    out.push_str("};\n");
}

fn shared_types(
    writer: &SectionWriter<'_>,
    module: &CompiledModule,
    functions: &[&FunctionSymbol],
    out: &mut String,
) {
    let types = ExportedTypes::from_functions(functions.iter().copied(), &module.types);
    writer.vectors(&types.vectors, out);
    writer.enums(&types.enums, out);
    writer.structs(&types.structs, true, out);
}

/// Device side: one `extern "C"` entry point per function that unpacks the
/// parameter block and calls the exported function.
pub fn render_dev_stub(
    file_name: &str,
    module: &CompiledModule,
    target: &Target,
    diagnostics: &DiagnosticManager,
) -> String {
    let writer = SectionWriter::new(module, target, DeclForm::Target);
    let decl = CDecl::new(target.vector_width(), DeclForm::Target);
    let all_exported = exported_functions(module);
    let functions = offloadable(module, diagnostics);
    let mut out = String::new();

    banner(file_name, &mut out);
    out.push_str("#include \"lanec/dev/offload.h\"\n\n");
    out.push_str("#include <stdint.h>\n\n");
    shared_types(&writer, module, &all_exported, &mut out);

    out.push_str("#ifdef __cplusplus\nnamespace lanec {\n#endif // __cplusplus\n");
    out.push('\n');
    out.push_str(RULE);
    out.push_str("// Functions exported from lanec code\n");
    out.push_str("// (so the dev stub knows what to call)\n");
    out.push_str(RULE);
    let named = all_exported
        .iter()
        .map(|function| (function.name.as_str(), *function))
        .collect::<Vec<_>>();
    writer.function_decls(&named, &mut out);
    out.push_str("#ifdef __cplusplus\n}/* end namespace */\n#endif // __cplusplus\n");

    out.push('\n');
    out.push_str(RULE);
    out.push_str("// actual dev stubs\n");
    out.push_str(RULE);
    out.push_str("// offload stubs only link as C++\n");
    out.push_str("extern \"C\" {\n\n");
    for function in functions {
        let block = param_struct_name(function);
        param_struct(&decl, function, &mut out);
        out.push('\n');
        out.push_str(&format!(
            "void {}(\n            uint32_t         in_BufferCount,\n            void**           in_ppBufferPointers,\n            uint64_t*        in_pBufferLengths,\n            void*            in_pMiscData,\n            uint16_t         in_MiscDataLength,\n            void*            in_pReturnValue,\n            uint16_t         in_ReturnValueLength)\n",
            block
        ));
        out.push_str("{\n");
        out.push_str(&format!(
            "  struct {} args;\n  memcpy(&args,in_pMiscData,sizeof(args));\n",
            block
        ));

        let mut args = Vec::with_capacity(function.ty.params.len());
        for param in &function.ty.params {
            let ty = by_value(&param.ty);
            if passed_separately(&ty) {
                let local = format!("_{}", param.name);
                out.push_str(&format!("  {};\n", decl.declare(&ty, &local)));
                out.push_str(&format!(
                    "  (void *&){} = lanec_dev_translate_pointer(*in_ppBufferPointers++);\n",
                    local
                ));
                args.push(local);
            } else {
                args.push(format!("args.{}", param.name));
            }
        }
        out.push_str(&format!("  lanec::{}({});\n", function.name, args.join(", ")));
        out.push_str("}\n\n");
    }
    out.push_str("}/* end extern C */\n");
    out
}

/// Host side: a function with the exported signature that fills the
/// parameter block and launches the device kernel.
pub fn render_host_stub(
    file_name: &str,
    module: &CompiledModule,
    target: &Target,
    diagnostics: &DiagnosticManager,
) -> String {
    let writer = SectionWriter::new(module, target, DeclForm::Target);
    let decl = CDecl::new(target.vector_width(), DeclForm::Target);
    let all_exported = exported_functions(module);
    let functions = offloadable(module, diagnostics);
    let mut out = String::new();

    banner(file_name, &mut out);
    out.push_str("#include \"lanec/host/offload.h\"\n\n");
    out.push_str("// host stubs have C++ linkage; the device side owns the C symbols\n\n");
    out.push_str("#ifdef __cplusplus\nnamespace lanec {\n#endif // __cplusplus\n\n");
    shared_types(&writer, module, &all_exported, &mut out);

    out.push('\n');
    out.push_str(RULE);
    out.push_str("// host-side stubs for dev-side lanec function(s)\n");
    out.push_str(RULE);
    for function in functions {
        let block = param_struct_name(function);
        param_struct(&decl, function, &mut out);
        out.push('\n');
        out.push_str(&format!("extern {} {{\n", decl.function(&function.name, &function.ty)));
        out.push_str(&format!("  {} __args;\n", block));

        let mut pointers = Vec::new();
        for param in &function.ty.params {
            if passed_separately(&param.ty) {
                pointers.push(format!("(void*){}", param.name));
                continue;
            }
            out.push_str(&format!("  __args.{} = {};\n", param.name, param.name));
        }
        let pointer_list = if pointers.is_empty() {
            "NULL".to_string()
        } else {
            pointers.join(",")
        };
        out.push_str(&format!("  void *ptr_args[] = {{ {} }};\n", pointer_list));
        out.push_str("  static lanec_kernel_handle_t kernel_handle = NULL;\n");
        out.push_str(&format!(
            "  if (!kernel_handle) kernel_handle = lanec_host_get_kernel_handle(\"{}\");\n",
            block
        ));
        out.push_str("  assert(kernel_handle);\n");
        out.push_str(&format!(
            "  lanec_host_call_kernel(kernel_handle,\n                        &__args, sizeof(__args),\n                        ptr_args,{});\n",
            pointers.len()
        ));
        out.push_str("}\n\n");
    }

    out.push_str("#ifdef __cplusplus\n}/* namespace */\n#endif // __cplusplus\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanec_core::frontend::{LanguageFrontend, SnapshotFrontend, TargetContext};
    use std::path::Path;

    const KERNELS: &str = r#"{
        "functions": [
            {
                "name": "saxpy",
                "type": {
                    "return_type": {"kind": "atomic", "atomic": "void"},
                    "params": [
                        {"name": "a", "type": {"kind": "atomic", "atomic": "float"}},
                        {"name": "x", "type": {"kind": "pointer", "pointee": {"kind": "atomic", "atomic": "float"}}},
                        {"name": "y", "type": {"kind": "pointer", "pointee": {"kind": "atomic", "atomic": "float"}}}
                    ],
                    "is_exported": true
                }
            },
            {
                "name": "sum",
                "type": {
                    "return_type": {"kind": "atomic", "atomic": "float"},
                    "params": [{"name": "n", "type": {"kind": "atomic", "atomic": "int32"}}],
                    "is_exported": true
                }
            },
            {
                "name": "tick",
                "type": {"return_type": {"kind": "atomic", "atomic": "void"}, "is_exported": true}
            }
        ]
    }"#;

    fn compile(source: &str) -> (CompiledModule, Target) {
        let target = Target::new(None, None, Some("sse4"), false).unwrap();
        let ctx = TargetContext::new(target.clone(), false);
        let (module, _) = SnapshotFrontend::new()
            .compile(source, Some(Path::new("kernels.json")), &ctx)
            .into_result()
            .unwrap();
        (module, target)
    }

    #[test]
    fn dev_stub_unpacks_arguments_and_translates_pointers() {
        let (module, target) = compile(KERNELS);
        let diagnostics = DiagnosticManager::new();
        let text = render_dev_stub("kernels_dev.cpp", &module, &target, &diagnostics);

        assert!(text.contains("#include \"lanec/dev/offload.h\""));
        assert!(text.contains("struct __lanec_dev_stub_saxpy {\n   float a;\n};\n"));
        assert!(text.contains("  struct __lanec_dev_stub_saxpy args;\n  memcpy(&args,in_pMiscData,sizeof(args));\n"));
        assert!(text.contains("  float *_x;\n  (void *&)_x = lanec_dev_translate_pointer(*in_ppBufferPointers++);\n"));
        assert!(text.contains("  lanec::saxpy(args.a, _x, _y);\n"));
        assert!(text.contains("  lanec::tick();\n"));
        assert!(!text.contains("__lanec_dev_stub_sum"));
        assert!(text.ends_with("}/* end extern C */\n"));
    }

    #[test]
    fn host_stub_launches_the_kernel() {
        let (module, target) = compile(KERNELS);
        let diagnostics = DiagnosticManager::new();
        let text = render_host_stub("kernels_host.cpp", &module, &target, &diagnostics);

        assert!(text.contains("extern void saxpy(float a, float *x, float *y) {\n  __lanec_dev_stub_saxpy __args;\n  __args.a = a;\n  void *ptr_args[] = { (void*)x,(void*)y };\n"));
        assert!(text.contains("lanec_host_get_kernel_handle(\"__lanec_dev_stub_saxpy\")"));
        assert!(text.contains("                        ptr_args,2);\n"));
        assert!(text.contains("  void *ptr_args[] = { NULL };\n"));
        assert!(text.contains("                        ptr_args,0);\n"));
    }

    #[test]
    fn non_void_exports_are_skipped_with_a_warning() {
        let (module, target) = compile(KERNELS);
        let diagnostics = DiagnosticManager::new();
        let text = render_host_stub("kernels_host.cpp", &module, &target, &diagnostics);
        assert!(!text.contains("extern float sum("));
        assert_eq!(diagnostics.error_count(), 0);
        assert_eq!(diagnostics.warning_count(), 1);
        assert!(diagnostics.get_diagnostics()[0]
            .message
            .contains("ignoring \"export\"ed function with non-void return types"));
    }

    #[test]
    fn non_const_references_are_errors() {
        let source = r#"{
            "functions": [{
                "name": "bump",
                "type": {
                    "return_type": {"kind": "atomic", "atomic": "void"},
                    "params": [{"name": "v", "type": {"kind": "reference", "target": {"kind": "atomic", "atomic": "int32"}}}],
                    "is_exported": true
                }
            }]
        }"#;
        let (module, target) = compile(source);
        let diagnostics = DiagnosticManager::new();
        render_dev_stub("bump_dev.cpp", &module, &target, &diagnostics);
        assert_eq!(diagnostics.error_count(), 1);
    }
}
