//! C/C++ headers declaring what a compiled program exports.
//!
//! A header lists, in order: short vector typedefs, enums, structs and the
//! exported function prototypes. The multi-target dispatch header is built
//! incrementally by [`DispatchHeader`], one target at a time, with every
//! shared section written once and struct layouts written once per vector
//! width.

use crate::options::OutputFlags;
use lanec_core::frontend::{CompiledModule, FunctionSymbol};
use lanec_core::lir::layout::DataLayout;
use lanec_core::lir::LirProgram;
use lanec_core::target::Target;
use lanec_core::types::cdecl::{c_struct_name, c_vector_name, CDecl, DeclForm};
use lanec_core::types::{Type, TypeRegistry, Variability};
use std::collections::BTreeSet;

const RULE: &str = "///////////////////////////////////////////////////////////////////////////\n";
const EXTERN_C_OPEN: &str = "#if defined(__cplusplus) && (! defined(__LANEC_NO_EXTERN_C) || !__LANEC_NO_EXTERN_C )\nextern \"C\" {\n#endif // __cplusplus\n";
const EXTERN_C_CLOSE: &str = "#if defined(__cplusplus) && (! defined(__LANEC_NO_EXTERN_C) || !__LANEC_NO_EXTERN_C )\n} /* end extern C */\n#endif // __cplusplus\n";
const ALIGN_MACROS: &str = "\n#ifndef __LANEC_ALIGN__
#if defined(__clang__) || !defined(_MSC_VER)
// Clang, GCC, ICC
#define __LANEC_ALIGN__(s) __attribute__((aligned(s)))
#define __LANEC_ALIGNED_STRUCT__(s) struct __LANEC_ALIGN__(s)
#else
// Visual Studio
#define __LANEC_ALIGN__(s) __declspec(align(s))
#define __LANEC_ALIGNED_STRUCT__(s) __LANEC_ALIGN__(s) struct
#endif
#endif

";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderOptions {
    /// `#pragma once` instead of an include guard.
    pub pragma_once: bool,
    /// Declare the instrumentation hook.
    pub instrument: bool,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        Self {
            pragma_once: true,
            instrument: false,
        }
    }
}

impl From<&OutputFlags> for HeaderOptions {
    fn from(flags: &OutputFlags) -> Self {
        Self {
            pragma_once: flags.pragma_once,
            instrument: flags.instrument,
        }
    }
}

/// Include guard for a header file name: `LANEC_` followed by the name with
/// letters uppercased and everything but digits turned into `_`.
pub fn header_guard(file_name: &str) -> String {
    let mut guard = String::from("LANEC_");
    for c in file_name.chars() {
        if c.is_ascii_digit() {
            guard.push(c);
        } else if c.is_ascii_alphabetic() {
            guard.push(c.to_ascii_uppercase());
        } else {
            guard.push('_');
        }
    }
    guard
}

/// Named types crossing the C boundary, deduplicated in first-use order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportedTypes {
    pub structs: Vec<(String, Variability)>,
    pub enums: Vec<String>,
    /// Short vectors, element type without const.
    pub vectors: Vec<(Type, u32)>,
}

impl ExportedTypes {
    /// Types mentioned by the signatures of `functions`.
    pub fn from_functions<'a>(
        functions: impl IntoIterator<Item = &'a FunctionSymbol>,
        registry: &TypeRegistry,
    ) -> Self {
        let mut types = Self::default();
        for function in functions {
            types.visit(&function.ty.return_type, registry);
            for param in &function.ty.params {
                types.visit(&param.ty, registry);
            }
        }
        types
    }

    /// Everything a header declares: the signature types of exported and
    /// extern "C" functions, then the explicitly exported types as uniform.
    pub fn for_header(module: &CompiledModule) -> Self {
        let symbols = &module.symbols;
        let mut types = Self::from_functions(
            symbols
                .exported_functions()
                .chain(symbols.extern_c_functions()),
            &module.types,
        );
        for ty in &module.exported_types {
            match ty {
                Type::Struct { name, .. } => {
                    types.add_struct(name, Variability::Uniform);
                }
                Type::Enum { name, .. } => types.add_enum(name),
                Type::Vector { element, count } => {
                    types.add_vector(&element.with_variability(Variability::Uniform), *count)
                }
                other => tracing::warn!("ignoring exported type {}", other),
            }
        }
        types
    }

    fn visit(&mut self, ty: &Type, registry: &TypeRegistry) {
        match ty {
            Type::Reference { target } => self.visit(target, registry),
            Type::Pointer { pointee, .. } => self.visit(pointee, registry),
            Type::Array { element, .. } => self.visit(element, registry),
            Type::Struct {
                name, variability, ..
            } => {
                if !self.add_struct(name, *variability) {
                    return;
                }
                if let Some(def) = registry.get_struct(name) {
                    for field in &def.fields {
                        self.visit(&def.field_type(field, *variability), registry);
                    }
                }
            }
            Type::Enum { name, .. } => self.add_enum(name),
            Type::Vector { element, count } => self.add_vector(element, *count),
            Type::Atomic { .. } => {}
        }
    }

    fn add_struct(&mut self, name: &str, variability: Variability) -> bool {
        let key = (name.to_string(), variability);
        if self.structs.contains(&key) {
            return false;
        }
        self.structs.push(key);
        true
    }

    fn add_enum(&mut self, name: &str) {
        if !self.enums.iter().any(|known| known == name) {
            self.enums.push(name.to_string());
        }
    }

    fn add_vector(&mut self, element: &Type, count: u32) {
        let key = (without_const(element), count);
        if !self.vectors.contains(&key) {
            self.vectors.push(key);
        }
    }
}

pub(crate) fn without_const(ty: &Type) -> Type {
    let mut ty = ty.clone();
    match &mut ty {
        Type::Atomic { is_const, .. }
        | Type::Enum { is_const, .. }
        | Type::Pointer { is_const, .. }
        | Type::Struct { is_const, .. } => *is_const = false,
        Type::Array { element, .. } | Type::Vector { element, .. } => {
            **element = without_const(element)
        }
        Type::Reference { .. } => {}
    }
    ty
}

/// Exported functions ordered by name.
pub(crate) fn exported_functions(module: &CompiledModule) -> Vec<&FunctionSymbol> {
    let mut functions = module.symbols.exported_functions().collect::<Vec<_>>();
    functions.sort_by(|a, b| a.name.cmp(&b.name));
    functions
}

/// Writes header sections for one compiled module on one target.
pub(crate) struct SectionWriter<'a> {
    module: &'a CompiledModule,
    target: &'a Target,
    decl: CDecl,
}

impl<'a> SectionWriter<'a> {
    pub(crate) fn new(module: &'a CompiledModule, target: &'a Target, form: DeclForm) -> Self {
        Self {
            module,
            target,
            decl: CDecl::new(target.vector_width(), form),
        }
    }

    fn abi_align(&self, ty: &Type) -> u32 {
        let mut scratch = LirProgram::new("layout");
        let lowered = lanec_core::types::Lowering::new(self.target, &self.module.types)
            .lower(ty, &mut scratch);
        DataLayout::new(self.target.pointer_bits(), &scratch.type_definitions).align_of(&lowered)
    }

    /// Only uniform vectors are declared; varying ones never reach C code.
    pub(crate) fn vectors(&self, vectors: &[(Type, u32)], out: &mut String) {
        if vectors.is_empty() {
            return;
        }
        out.push_str(RULE);
        out.push_str("// Vector types with external visibility from lanec code\n");
        out.push_str(RULE);
        out.push('\n');
        for (element, count) in vectors {
            if !element.variability().is_uniform() {
                continue;
            }
            let name = c_vector_name(element, *count);
            let base = self.decl.declare(element, "");
            let align = self.abi_align(&Type::Vector {
                element: Box::new(element.clone()),
                count: *count,
            });
            out.push_str(&format!("#ifndef __LANEC_VECTOR_{}__\n", name));
            out.push_str(&format!("#define __LANEC_VECTOR_{}__\n", name));
            out.push_str(&format!("#ifdef _MSC_VER\n__declspec( align({}) ) ", align));
            out.push_str(&format!("struct {} {{ {} v[{}]; }};\n", name, base, count));
            out.push_str("#else\n");
            out.push_str(&format!(
                "struct {} {{ {} v[{}]; }} __attribute__ ((aligned({})));\n",
                name, base, count, align
            ));
            out.push_str("#endif\n#endif\n\n");
        }
        out.push('\n');
    }

    pub(crate) fn enums(&self, enums: &[String], out: &mut String) {
        if enums.is_empty() {
            return;
        }
        out.push_str(RULE);
        out.push_str("// Enumerator types with external visibility from lanec code\n");
        out.push_str(RULE);
        out.push('\n');
        for name in enums {
            out.push_str(&format!("#ifndef __LANEC_ENUM_{}__\n", name));
            out.push_str(&format!("#define __LANEC_ENUM_{}__\n", name));
            out.push_str(&format!("enum {} {{\n", name));
            let values = self
                .module
                .types
                .get_enum(name)
                .map(|def| def.values.as_slice())
                .unwrap_or_default();
            for (index, value) in values.iter().enumerate() {
                let separator = if index + 1 < values.len() { ',' } else { ' ' };
                out.push_str(&format!("    {} = {}{}\n", value.name, value.value, separator));
            }
            out.push_str("};\n#endif\n\n");
        }
    }

    /// With `emit_unifs` off, structs without a varying member are skipped:
    /// their layout does not depend on the vector width.
    pub(crate) fn structs(
        &self,
        structs: &[(String, Variability)],
        emit_unifs: bool,
        out: &mut String,
    ) {
        out.push_str(ALIGN_MACROS);
        let mut emitted = Vec::new();
        for (name, variability) in structs {
            self.struct_decl(name, *variability, &mut emitted, emit_unifs, out);
        }
    }

    fn struct_decl(
        &self,
        name: &str,
        variability: Variability,
        emitted: &mut Vec<(String, Variability)>,
        emit_unifs: bool,
        out: &mut String,
    ) {
        let Some(def) = self.module.types.get_struct(name) else {
            return;
        };
        if !emit_unifs && !def.fields.iter().any(|field| field.ty.is_varying()) {
            return;
        }
        let key = (name.to_string(), variability);
        if emitted.contains(&key) {
            return;
        }

        // members first
        for field in &def.fields {
            if let Some((nested, nested_variability)) =
                element_struct(&def.field_type(field, variability))
            {
                self.struct_decl(&nested, nested_variability, emitted, emit_unifs, out);
            }
        }
        emitted.push(key);

        let c_name = c_struct_name(name, variability, self.target.vector_width());
        out.push_str(&format!("#ifndef __LANEC_STRUCT_{}__\n", c_name));
        out.push_str(&format!("#define __LANEC_STRUCT_{}__\n", c_name));

        let fields = def
            .fields
            .iter()
            .map(|field| (field, without_const(&def.field_type(field, variability))))
            .collect::<Vec<_>>();
        let lane_sized = |ty: &Type| ty.is_varying() && !ty.is_struct();
        let needs_align = fields.iter().any(|(_, ty)| lane_sized(ty));
        if needs_align {
            let align = self.abi_align(&Type::structure(name, variability));
            out.push_str(&format!("__LANEC_ALIGNED_STRUCT__({}) {} {{\n", align, c_name));
        } else {
            out.push_str(&format!("struct {} {{\n", c_name));
        }
        for (field, ty) in &fields {
            out.push_str("    ");
            if needs_align && lane_sized(ty) {
                out.push_str(&format!("__LANEC_ALIGN__({}) ", self.abi_align(ty)));
            }
            out.push_str(&self.decl.declare(ty, &field.name));
            out.push_str(";\n");
        }
        out.push_str("};\n#endif\n\n");
    }

    pub(crate) fn function_decls(&self, functions: &[(&str, &FunctionSymbol)], out: &mut String) {
        out.push_str(EXTERN_C_OPEN);
        for (name, function) in functions {
            out.push_str(&format!("    extern {};\n", self.decl.function(name, &function.ty)));
        }
        out.push_str(EXTERN_C_CLOSE);
    }
}

// struct named by a field, directly or as an array element
fn element_struct(ty: &Type) -> Option<(String, Variability)> {
    match ty {
        Type::Struct {
            name, variability, ..
        } => Some((name.clone(), *variability)),
        Type::Array { element, .. } => element_struct(element),
        _ => None,
    }
}

fn front_matter(file_name: &str, options: &HeaderOptions, out: &mut String) {
    out.push_str(&format!(
        "//\n// {}\n// (Header automatically generated by the lanec compiler.)\n",
        file_name
    ));
    out.push_str("// DO NOT EDIT THIS FILE.\n//\n\n");
    if options.pragma_once {
        out.push_str("#pragma once\n");
    } else {
        let guard = header_guard(file_name);
        out.push_str(&format!("#ifndef {}\n#define {}\n\n", guard, guard));
    }
    out.push_str("#include <stdint.h>\n\n");
    if options.instrument {
        out.push_str("#define LANEC_INSTRUMENTATION 1\n");
        out.push_str(EXTERN_C_OPEN);
        out.push_str(
            "  void LANECInstrument(const char *fn, const char *note, int line, uint64_t mask);\n",
        );
        out.push_str(EXTERN_C_CLOSE);
    }
    out.push('\n');
    out.push_str("\n#ifdef __cplusplus\nnamespace lanec { /* namespace */\n#endif // __cplusplus\n");
}

fn back_matter(file_name: &str, options: &HeaderOptions, out: &mut String) {
    out.push('\n');
    out.push_str("\n#ifdef __cplusplus\n} /* namespace */\n#endif // __cplusplus\n");
    if !options.pragma_once {
        out.push_str(&format!("\n#endif // {}\n", header_guard(file_name)));
    }
}

fn functions_banner(out: &mut String) {
    out.push('\n');
    out.push_str(RULE);
    out.push_str("// Functions exported from lanec code\n");
    out.push_str(RULE);
}

/// Header for one module compiled for one target. Functions are declared
/// under their symbol names, which carry the ISA suffix in multi-target
/// builds.
pub fn render_header(
    file_name: &str,
    module: &CompiledModule,
    target: &Target,
    options: &HeaderOptions,
) -> String {
    let writer = SectionWriter::new(module, target, DeclForm::Target);
    let types = ExportedTypes::for_header(module);
    let mut out = String::new();

    front_matter(file_name, options, &mut out);
    writer.vectors(&types.vectors, &mut out);
    writer.enums(&types.enums, &mut out);
    writer.structs(&types.structs, true, &mut out);

    let functions = exported_functions(module);
    if !functions.is_empty() {
        functions_banner(&mut out);
        let named = functions
            .iter()
            .map(|function| (function.symbol.as_str(), *function))
            .collect::<Vec<_>>();
        writer.function_decls(&named, &mut out);
    }

    back_matter(file_name, options, &mut out);
    out
}

/// The header of a multi-target build, accumulated over the targets.
#[derive(Debug, Clone)]
pub struct DispatchHeader {
    file_name: String,
    options: HeaderOptions,
    text: String,
    emit_front_matter: bool,
    emit_unifs: bool,
    emit_funcs: bool,
    emitted_widths: BTreeSet<u32>,
}

impl DispatchHeader {
    pub fn new(file_name: impl Into<String>, options: HeaderOptions) -> Self {
        Self {
            file_name: file_name.into(),
            options,
            text: String::new(),
            emit_front_matter: true,
            emit_unifs: true,
            emit_funcs: true,
            emitted_widths: BTreeSet::new(),
        }
    }

    /// Adds whatever `module` contributes that is not yet in the header.
    pub fn add_target(&mut self, module: &CompiledModule, target: &Target) {
        let out = &mut self.text;
        if self.emit_front_matter {
            front_matter(&self.file_name, &self.options, out);
            out.push('\n');
            self.emit_front_matter = false;
        }

        let writer = SectionWriter::new(module, target, DeclForm::Dispatch);
        if self.emitted_widths.insert(target.vector_width()) {
            let types = ExportedTypes::for_header(module);
            if self.emit_unifs {
                writer.vectors(&types.vectors, out);
                writer.enums(&types.enums, out);
            }
            writer.structs(&types.structs, self.emit_unifs, out);
            self.emit_unifs = false;
        }

        if self.emit_funcs {
            let functions = exported_functions(module);
            if !functions.is_empty() {
                functions_banner(out);
                let named = functions
                    .iter()
                    .map(|function| (function.name.as_str(), *function))
                    .collect::<Vec<_>>();
                writer.function_decls(&named, out);
                out.push('\n');
            }
            self.emit_funcs = false;
        }
    }

    /// Closes the header. Returns an empty string if no target was added.
    pub fn finish(mut self) -> String {
        if self.emit_front_matter {
            return String::new();
        }
        back_matter(&self.file_name, &self.options, &mut self.text);
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanec_core::frontend::{LanguageFrontend, SnapshotFrontend, TargetContext};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const SCALE: &str = r#"{
        "functions": [{
            "name": "scale",
            "type": {
                "return_type": {"kind": "atomic", "atomic": "void"},
                "params": [
                    {"name": "p", "type": {"kind": "pointer", "pointee": {"kind": "atomic", "atomic": "float", "variability": "varying"}}},
                    {"name": "n", "type": {"kind": "atomic", "atomic": "int32"}}
                ],
                "is_exported": true
            }
        }]
    }"#;

    const PARTICLES: &str = r#"{
        "structs": [
            {"name": "Config", "fields": [{"name": "count", "type": {"kind": "atomic", "atomic": "int32"}}]},
            {"name": "Particle", "fields": [
                {"name": "mass", "type": {"kind": "atomic", "atomic": "float"}},
                {"name": "lanes", "type": {"kind": "atomic", "atomic": "float", "variability": "varying"}},
                {"name": "config", "type": {"kind": "struct", "name": "Config"}}
            ]}
        ],
        "enums": [{"name": "Mode", "values": [{"name": "FAST", "value": 0}, {"name": "EXACT", "value": 1}]}],
        "functions": [
            {
                "name": "step",
                "type": {
                    "return_type": {"kind": "atomic", "atomic": "void"},
                    "params": [
                        {"name": "particles", "type": {"kind": "pointer", "pointee": {"kind": "struct", "name": "Particle"}}},
                        {"name": "mode", "type": {"kind": "enum", "name": "Mode"}},
                        {"name": "origin", "type": {"kind": "vector", "element": {"kind": "atomic", "atomic": "float"}, "count": 4}}
                    ],
                    "is_exported": true
                }
            },
            {
                "name": "reset",
                "type": {"return_type": {"kind": "atomic", "atomic": "void"}, "is_exported": true}
            }
        ]
    }"#;

    fn compile(source: &str, target: &str, mangle: bool) -> (CompiledModule, Target) {
        let target = Target::new(None, None, Some(target), false).unwrap();
        let ctx = TargetContext::new(target.clone(), mangle);
        let (module, _) = SnapshotFrontend::new()
            .compile(source, Some(Path::new("kernel.json")), &ctx)
            .into_result()
            .unwrap();
        (module, target)
    }

    #[test]
    fn guards_replace_everything_but_letters_and_digits() {
        assert_eq!(header_guard("out/scale-v2.h"), "LANEC_OUT_SCALE_V2_H");
    }

    #[test]
    fn renders_a_single_target_header() {
        let (module, target) = compile(SCALE, "sse2", false);
        let text = render_header("scale.h", &module, &target, &HeaderOptions::default());
        assert_eq!(
            text,
            format!(
                "//
// scale.h
// (Header automatically generated by the lanec compiler.)
// DO NOT EDIT THIS FILE.
//

#pragma once
#include <stdint.h>



#ifdef __cplusplus
namespace lanec {{ /* namespace */
#endif // __cplusplus
{ALIGN_MACROS}
{RULE}// Functions exported from lanec code
{RULE}{EXTERN_C_OPEN}    extern void scale(float (*p)[4], int32_t n);
{EXTERN_C_CLOSE}

#ifdef __cplusplus
}} /* namespace */
#endif // __cplusplus
"
            )
        );
    }

    #[test]
    fn include_guards_close_at_the_end() {
        let (module, target) = compile(SCALE, "sse2", false);
        let options = HeaderOptions {
            pragma_once: false,
            instrument: true,
        };
        let text = render_header("scale.h", &module, &target, &options);
        assert!(text.contains("#ifndef LANEC_SCALE_H\n#define LANEC_SCALE_H\n\n#include <stdint.h>"));
        assert!(text.ends_with("\n#endif // LANEC_SCALE_H\n"));
        assert!(text.contains("#define LANEC_INSTRUMENTATION 1\n"));
        assert!(!text.contains("#pragma once"));
    }

    #[test]
    fn per_target_headers_use_mangled_symbols() {
        let (module, target) = compile(SCALE, "avx2", true);
        let text = render_header("scale_avx2.h", &module, &target, &HeaderOptions::default());
        assert!(text.contains("    extern void scale_avx2(float (*p)[8], int32_t n);\n"));
    }

    #[test]
    fn declares_types_used_by_exports() {
        let (module, target) = compile(PARTICLES, "sse2", false);
        let text = render_header("particles.h", &module, &target, &HeaderOptions::default());

        assert!(text.contains(
            "#ifdef _MSC_VER\n__declspec( align(16) ) struct float4 { float v[4]; };\n#else\nstruct float4 { float v[4]; } __attribute__ ((aligned(16)));\n"
        ));
        assert!(text.contains("enum Mode {\n    FAST = 0,\n    EXACT = 1 \n};\n"));
        assert!(text.contains("#ifndef __LANEC_STRUCT_Config__\n#define __LANEC_STRUCT_Config__\nstruct Config {\n    int32_t count;\n};\n"));
        assert!(text.contains(
            "__LANEC_ALIGNED_STRUCT__(16) Particle {\n    float mass;\n    __LANEC_ALIGN__(16) float lanes[4];\n    struct Config config;\n};\n"
        ));
        // nested structs come first
        let config = text.find("struct Config {").unwrap();
        let particle = text.find("Particle {").unwrap();
        assert!(config < particle);
        // sorted by name
        let reset = text.find("extern void reset(void);").unwrap();
        let step = text.find("extern void step(").unwrap();
        assert!(reset < step);
    }

    #[test]
    fn dispatch_header_emits_shared_sections_once() {
        let mut header = DispatchHeader::new("particles.h", HeaderOptions::default());
        for target in ["sse2", "avx2", "avx1-i32x16", "sse4"] {
            let (module, target) = compile(PARTICLES, target, true);
            header.add_target(&module, &target);
        }
        let text = header.finish();

        let count = |needle: &str| text.matches(needle).count();
        assert_eq!(count("// (Header automatically generated"), 1);
        assert_eq!(count("namespace lanec { /* namespace */"), 1);
        assert_eq!(count("} /* namespace */"), 1);
        assert_eq!(count("// Vector types with external visibility"), 1);
        assert_eq!(count("// Enumerator types with external visibility"), 1);
        assert_eq!(count("// Functions exported from lanec code"), 1);
        // widths 4, 8 and 16; sse4 shares width 4 with sse2
        assert_eq!(count("#define __LANEC_STRUCT_Particle__"), 3);
        assert_eq!(count("#define __LANEC_STRUCT_Config__"), 1);
        assert!(text.contains("float lanes[8];"));
        assert!(text.contains("float lanes[16];"));
        // unmangled names in the dispatch form
        assert!(text.contains("    extern void step(struct Particle *particles, enum Mode mode, struct float4 origin);\n"));
        assert!(!text.contains("step_sse2"));
    }

    #[test]
    fn dispatch_header_without_targets_is_empty() {
        assert_eq!(DispatchHeader::new("x.h", HeaderOptions::default()).finish(), "");
    }
}
