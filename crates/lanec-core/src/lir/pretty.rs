//! Textual rendering of LIR modules in LLVM assembly syntax.

use std::collections::HashMap;
use std::fmt::{self, Formatter};

use crate::pretty::{escape_string, PrettyCtx, PrettyPrintable};

use super::ty::Ty;
use super::{
    value_type, CallingConvention, Linkage, LirBasicBlock, LirConstant, LirFunction, LirGlobal,
    LirInstruction, LirInstructionKind, LirProgram, LirTerminator, LirValue, RegisterId,
    Visibility,
};

impl PrettyPrintable for LirProgram {
    fn fmt_pretty(&self, f: &mut Formatter<'_>, ctx: &mut PrettyCtx<'_>) -> fmt::Result {
        if ctx.options.show_module_header {
            ctx.writeln(f, format!("; ModuleID = '{}'", self.name))?;
            if let Some(layout) = &self.data_layout {
                ctx.writeln(f, format!("target datalayout = \"{}\"", escape_string(layout)))?;
            }
            if let Some(triple) = &self.target_triple {
                ctx.writeln(f, format!("target triple = \"{}\"", escape_string(triple)))?;
            }
            writeln!(f)?;
        }

        if !self.type_definitions.is_empty() {
            for typedef in &self.type_definitions {
                ctx.writeln(
                    f,
                    format!("%{} = type {}", typedef.name, format_type(&typedef.ty)),
                )?;
            }
            writeln!(f)?;
        }

        if !self.globals.is_empty() {
            for global in &self.globals {
                ctx.writeln(f, format_global(global))?;
            }
            writeln!(f)?;
        }

        for (idx, func) in self.functions.iter().enumerate() {
            write_function(self, func, f, ctx)?;
            if idx + 1 < self.functions.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

fn format_global(global: &LirGlobal) -> String {
    let mut line = format!("@{} = ", global.name);
    match (&global.initializer, global.linkage) {
        (None, Linkage::External) => line.push_str("external "),
        (_, linkage) => {
            if let Some(linkage) = format_linkage(linkage) {
                line.push_str(linkage);
                line.push(' ');
            }
        }
    }
    if let Some(visibility) = format_visibility(global.visibility) {
        line.push_str(visibility);
        line.push(' ');
    }
    line.push_str(if global.is_constant {
        "constant "
    } else {
        "global "
    });
    line.push_str(&format_type(&global.ty));
    if let Some(initializer) = &global.initializer {
        line.push(' ');
        line.push_str(&format_constant_value(initializer));
    }
    if let Some(section) = &global.section {
        line.push_str(&format!(", section \"{}\"", escape_string(section)));
    }
    if let Some(align) = global.alignment {
        line.push_str(&format!(", align {}", align));
    }
    line
}

fn write_function(
    program: &LirProgram,
    func: &LirFunction,
    f: &mut Formatter<'_>,
    ctx: &mut PrettyCtx<'_>,
) -> fmt::Result {
    let mut params = func
        .locals
        .iter()
        .filter(|local| local.is_argument)
        .map(|local| {
            if func.is_declaration() {
                format_type(&local.ty)
            } else {
                format!("{} {}", format_type(&local.ty), local_name(func, local.id))
            }
        })
        .collect::<Vec<_>>();
    if func.signature.is_variadic {
        params.push("...".into());
    }

    let mut prefix = Vec::new();
    if !func.is_declaration() {
        if let Some(linkage) = format_linkage(func.linkage) {
            prefix.push(linkage);
        }
    }
    if let Some(cc) = format_calling_convention(func.calling_convention) {
        prefix.push(cc);
    }
    let prefix = prefix
        .iter()
        .map(|part| format!("{} ", part))
        .collect::<String>();

    let header = format!(
        "{}{}{} @{}({})",
        if func.is_declaration() {
            "declare "
        } else {
            "define "
        },
        prefix,
        format_type(&func.signature.return_type),
        func.name,
        params.join(", ")
    );
    if func.is_declaration() {
        return ctx.writeln(f, header);
    }

    ctx.writeln(f, header + " {")?;
    let mut registers = HashMap::new();
    for block in &func.basic_blocks {
        write_block(program, func, block, &mut registers, f, ctx)?;
    }
    ctx.writeln(f, "}")
}

fn write_block(
    program: &LirProgram,
    func: &LirFunction,
    block: &LirBasicBlock,
    registers: &mut HashMap<RegisterId, Ty>,
    f: &mut Formatter<'_>,
    ctx: &mut PrettyCtx<'_>,
) -> fmt::Result {
    ctx.writeln(f, format!("{}:", block_name(func, block.id)))?;
    ctx.with_indent(|ctx| {
        for inst in &block.instructions {
            let text = format_instruction(program, func, inst, registers);
            if inst.defines_register() {
                if let Some(ty) = &inst.type_hint {
                    registers.insert(inst.id, ty.clone());
                }
            }
            ctx.writeln(f, text)?;
        }
        ctx.writeln(
            f,
            format_terminator(program, func, &block.terminator, registers),
        )
    })
}

fn block_name(func: &LirFunction, id: u32) -> String {
    match func.get_basic_block(id).and_then(|block| block.label.as_ref()) {
        Some(label) => format!("{}.{}", label, id),
        None => format!("bb{}", id),
    }
}

fn local_name(func: &LirFunction, id: u32) -> String {
    match func.local(id).and_then(|local| local.name.as_ref()) {
        Some(name) => format!("%{}", name),
        None => format!("%arg{}", id),
    }
}

fn format_instruction(
    program: &LirProgram,
    func: &LirFunction,
    inst: &LirInstruction,
    registers: &HashMap<RegisterId, Ty>,
) -> String {
    use LirInstructionKind::*;

    let value = |value: &LirValue| format_value(func, value);
    let typed = |value: &LirValue| format_typed_value(program, func, value, registers);
    let result = format!("%r{}", inst.id);

    let binary = |op: &str, lhs: &LirValue, rhs: &LirValue| {
        format!("{} = {} {}, {}", result, op, typed(lhs), value(rhs))
    };

    match &inst.kind {
        Add(lhs, rhs) => binary("add", lhs, rhs),
        Sub(lhs, rhs) => binary("sub", lhs, rhs),
        Mul(lhs, rhs) => binary("mul", lhs, rhs),
        And(lhs, rhs) => binary("and", lhs, rhs),
        Or(lhs, rhs) => binary("or", lhs, rhs),
        Xor(lhs, rhs) => binary("xor", lhs, rhs),
        Eq(lhs, rhs) => binary("icmp eq", lhs, rhs),
        Ne(lhs, rhs) => binary("icmp ne", lhs, rhs),
        Lt(lhs, rhs) => binary("icmp slt", lhs, rhs),
        Le(lhs, rhs) => binary("icmp sle", lhs, rhs),
        Gt(lhs, rhs) => binary("icmp sgt", lhs, rhs),
        Ge(lhs, rhs) => binary("icmp sge", lhs, rhs),
        Load {
            address,
            alignment,
            volatile,
        } => {
            let loaded = inst
                .type_hint
                .as_ref()
                .map(format_type)
                .unwrap_or_else(|| "void".into());
            let mut text = format!(
                "{} = load {}{}, {}",
                result,
                if *volatile { "volatile " } else { "" },
                loaded,
                typed(address)
            );
            if let Some(align) = alignment {
                text.push_str(&format!(", align {}", align));
            }
            text
        }
        Store {
            value: stored,
            address,
            alignment,
            volatile,
        } => {
            let mut text = format!(
                "store {}{}, {}",
                if *volatile { "volatile " } else { "" },
                typed(stored),
                typed(address)
            );
            if let Some(align) = alignment {
                text.push_str(&format!(", align {}", align));
            }
            text
        }
        Bitcast(source, ty) => format!(
            "{} = bitcast {} to {}",
            result,
            typed(source),
            format_type(ty)
        ),
        Call {
            function,
            args,
            calling_convention,
            tail_call,
        } => {
            let ret = inst.type_hint.clone().unwrap_or(Ty::Void);
            let args = args.iter().map(|arg| typed(arg)).collect::<Vec<_>>().join(", ");
            let mut text = String::new();
            if inst.defines_register() {
                text.push_str(&format!("{} = ", result));
            }
            if *tail_call {
                text.push_str("tail ");
            }
            text.push_str("call ");
            if let Some(cc) = format_calling_convention(*calling_convention) {
                text.push_str(cc);
                text.push(' ');
            }
            text.push_str(&format!("{} {}({})", format_type(&ret), value(function), args));
            text
        }
        Unreachable => "unreachable".into(),
    }
}

fn format_terminator(
    program: &LirProgram,
    func: &LirFunction,
    terminator: &LirTerminator,
    registers: &HashMap<RegisterId, Ty>,
) -> String {
    match terminator {
        LirTerminator::Return(None) => "ret void".into(),
        LirTerminator::Return(Some(value)) => {
            format!("ret {}", format_typed_value(program, func, value, registers))
        }
        LirTerminator::Br(target) => format!("br label %{}", block_name(func, *target)),
        LirTerminator::CondBr {
            condition,
            if_true,
            if_false,
        } => format!(
            "br {}, label %{}, label %{}",
            format_typed_value(program, func, condition, registers),
            block_name(func, *if_true),
            block_name(func, *if_false)
        ),
        LirTerminator::Unreachable => "unreachable".into(),
    }
}

fn format_typed_value(
    program: &LirProgram,
    func: &LirFunction,
    value: &LirValue,
    registers: &HashMap<RegisterId, Ty>,
) -> String {
    let ty = value_type(value, func, program, registers)
        .map(|ty| format_type(&ty))
        .unwrap_or_else(|| "<unknown>".into());
    format!("{} {}", ty, format_value(func, value))
}

fn format_value(func: &LirFunction, value: &LirValue) -> String {
    match value {
        LirValue::Register(id) => format!("%r{}", id),
        LirValue::Constant(constant) => format_constant_value(constant),
        LirValue::Global(name, _) | LirValue::Function(name) => format!("@{}", name),
        LirValue::Local(id) => local_name(func, *id),
        LirValue::Undef(_) => "undef".into(),
        LirValue::Null(_) => "null".into(),
    }
}

/// Constant with its type prefix, as used in initializers and aggregates.
pub fn format_constant(constant: &LirConstant) -> String {
    format!("{} {}", format_type(&constant.ty()), format_constant_value(constant))
}

fn format_constant_value(constant: &LirConstant) -> String {
    let elements = |items: &[LirConstant]| {
        items
            .iter()
            .map(format_constant)
            .collect::<Vec<_>>()
            .join(", ")
    };
    match constant {
        LirConstant::Int(value, Ty::I1) => (*value != 0).to_string(),
        LirConstant::Int(value, _) => value.to_string(),
        LirConstant::Float(value, _) => format_float(*value),
        LirConstant::Bool(value) => value.to_string(),
        LirConstant::Vector(items, _) => format!("<{}>", elements(items)),
        LirConstant::Array(items, _) => format!("[{}]", elements(items)),
        LirConstant::Struct(items, _) => format!("{{ {} }}", elements(items)),
        LirConstant::Zero(ty) => match ty {
            Ty::F32 | Ty::F64 => format_float(0.0),
            Ty::Ptr(_) | Ty::Function { .. } => "null".into(),
            Ty::I1 => "false".into(),
            ty if ty.is_first_class() && !is_aggregate(ty) => "0".into(),
            _ => "zeroinitializer".into(),
        },
        LirConstant::Null(_) => "null".into(),
        LirConstant::Undef(_) => "undef".into(),
    }
}

fn is_aggregate(ty: &Ty) -> bool {
    matches!(
        ty,
        Ty::Array(..) | Ty::Struct { .. } | Ty::Named(_) | Ty::Vector(..)
    )
}

fn format_float(value: f64) -> String {
    if !value.is_finite() {
        return format!("0x{:016X}", value.to_bits());
    }
    let text = format!("{:.6e}", value);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let exponent = exponent.parse::<i32>().unwrap_or(0);
    format!(
        "{}e{}{:02}",
        mantissa,
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

pub fn format_type(ty: &Ty) -> String {
    use Ty::*;

    match ty {
        I1 => "i1".into(),
        I8 => "i8".into(),
        I16 => "i16".into(),
        I32 => "i32".into(),
        I64 => "i64".into(),
        I128 => "i128".into(),
        F32 => "float".into(),
        F64 => "double".into(),
        Void => "void".into(),
        Ptr(inner) => format!("{}*", format_type(inner)),
        Array(inner, count) => format!("[{} x {}]", count, format_type(inner)),
        Struct { fields, packed } => {
            let body = fields
                .iter()
                .map(format_type)
                .collect::<Vec<_>>()
                .join(", ");
            match (*packed, body.is_empty()) {
                (true, _) => format!("<{{ {} }}>", body),
                (false, true) => "{}".into(),
                (false, false) => format!("{{ {} }}", body),
            }
        }
        Named(name) => format!("%{}", name),
        Function {
            return_type,
            param_types,
            is_variadic,
        } => {
            let mut params = param_types.iter().map(format_type).collect::<Vec<_>>();
            if *is_variadic {
                params.push("...".into());
            }
            format!("{} ({})", format_type(return_type), params.join(", "))
        }
        Vector(inner, count) => format!("<{} x {}>", count, format_type(inner)),
    }
}

fn format_linkage(linkage: Linkage) -> Option<&'static str> {
    match linkage {
        Linkage::External => None,
        Linkage::Internal => Some("internal"),
        Linkage::Private => Some("private"),
        Linkage::LinkOnceOdr => Some("linkonce_odr"),
        Linkage::WeakAny => Some("weak"),
    }
}

fn format_visibility(visibility: Visibility) -> Option<&'static str> {
    match visibility {
        Visibility::Default => None,
        Visibility::Hidden => Some("hidden"),
        Visibility::Protected => Some("protected"),
    }
}

fn format_calling_convention(cc: CallingConvention) -> Option<&'static str> {
    match cc {
        CallingConvention::C => None,
        CallingConvention::Fast => Some("fastcc"),
        CallingConvention::Cold => Some("coldcc"),
        CallingConvention::X86VectorCall => Some("x86_vectorcallcc"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{LirFunctionSignature, LirGlobal};
    use crate::pretty::{pretty, PrettyOptions};
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_module_in_llvm_syntax() {
        let mut program = LirProgram::new("m").with_target("x86_64-unknown-linux-gnu", "e-m:e");
        program.add_type_definition(
            "v4_uniform_P",
            Ty::Struct {
                fields: vec![Ty::F32, Ty::I32],
                packed: false,
            },
        );
        program.add_global(
            LirGlobal::new("counter", Ty::I32).with_initializer(LirConstant::Int(5, Ty::I32)),
        );
        program.add_global(LirGlobal::new("table", Ty::Array(Box::new(Ty::F32), 2)));
        program.add_global(
            LirGlobal::new("flag", Ty::I32)
                .with_linkage(Linkage::Internal)
                .with_initializer(LirConstant::Int(-1, Ty::I32)),
        );
        program.add_function(LirFunction::declaration(
            "abort",
            LirFunctionSignature::new(Vec::new(), Ty::Void),
        ));

        let mut func = LirFunction::new(
            "get",
            LirFunctionSignature::new(vec![Ty::ptr(Ty::F32)], Ty::I32),
            CallingConvention::C,
            Linkage::External,
        )
        .with_param_names(["p"]);
        let mut entry = LirBasicBlock::new(0, Some("entry".into()));
        entry.add_instruction(
            LirInstruction::new(
                1,
                LirInstructionKind::Load {
                    address: program.globals[0].address(),
                    alignment: Some(4),
                    volatile: false,
                },
            )
            .with_type(Ty::I32),
        );
        entry.add_instruction(
            LirInstruction::new(2, LirInstructionKind::Bitcast(LirValue::Local(0), Ty::opaque_ptr()))
                .with_type(Ty::opaque_ptr()),
        );
        entry.set_terminator(LirTerminator::Return(Some(LirValue::Register(1))));
        func.add_basic_block(entry);
        program.add_function(func);

        let text = pretty(&program, PrettyOptions::default()).to_string();
        let expected = "\
; ModuleID = 'm'
target datalayout = \"e-m:e\"
target triple = \"x86_64-unknown-linux-gnu\"

%v4_uniform_P = type { float, i32 }

@counter = global i32 5
@table = external global [2 x float]
@flag = internal global i32 -1

declare void @abort()

define i32 @get(float* %p) {
entry.0:
  %r1 = load i32, i32* @counter, align 4
  %r2 = bitcast float* %p to i8*
  ret i32 %r1
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn global_initializers_carry_the_type_once() {
        let pair = Ty::Struct {
            fields: vec![Ty::I32, Ty::F32],
            packed: false,
        };
        let global = LirGlobal::new("pair", pair.clone()).with_initializer(LirConstant::Struct(
            vec![LirConstant::Int(1, Ty::I32), LirConstant::Float(0.5, Ty::F32)],
            pair,
        ));
        assert_eq!(
            format_global(&global),
            "@pair = global { i32, float } { i32 1, float 5.000000e-01 }"
        );

        let zeroed = LirGlobal::new("lanes", Ty::Vector(Box::new(Ty::I32), 8))
            .with_initializer(LirConstant::Zero(Ty::Vector(Box::new(Ty::I32), 8)));
        assert_eq!(format_global(&zeroed), "@lanes = global <8 x i32> zeroinitializer");
    }

    #[test]
    fn formats_constants() {
        assert_eq!(format_constant(&LirConstant::Float(1.5, Ty::F32)), "float 1.500000e+00");
        assert_eq!(
            format_constant(&LirConstant::Zero(Ty::Vector(Box::new(Ty::I32), 4))),
            "<4 x i32> zeroinitializer"
        );
        assert_eq!(format_constant(&LirConstant::Zero(Ty::ptr(Ty::I8))), "i8* null");
        assert_eq!(
            format_constant(&LirConstant::Vector(
                vec![LirConstant::Int(5, Ty::I32), LirConstant::Int(5, Ty::I32)],
                Ty::Vector(Box::new(Ty::I32), 2)
            )),
            "<2 x i32> <i32 5, i32 5>"
        );
        assert_eq!(format_float(-0.125), "-1.250000e-01");
    }
}
