//! Structural checks run on every module before it is emitted.

use super::pretty::format_type;
use super::{
    value_type, LirFunction, LirInstructionKind, LirProgram, LirTerminator, LirType, LirValue,
    RegisterId,
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}{message}", location(.function))]
pub struct VerifyError {
    pub function: Option<String>,
    pub message: String,
}

fn location(function: &Option<String>) -> String {
    function
        .as_ref()
        .map(|name| format!("in @{}: ", name))
        .unwrap_or_default()
}

impl VerifyError {
    fn module(message: impl Into<String>) -> Self {
        Self {
            function: None,
            message: message.into(),
        }
    }

    fn in_function(function: &LirFunction, message: impl Into<String>) -> Self {
        Self {
            function: Some(function.name.clone()),
            message: message.into(),
        }
    }
}

pub fn verify_program(program: &LirProgram) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();

    let mut symbols = HashSet::new();
    for name in program
        .globals
        .iter()
        .map(|global| &global.name)
        .chain(program.functions.iter().map(|func| &func.name))
    {
        if !symbols.insert(name.as_str()) {
            errors.push(VerifyError::module(format!("symbol @{} is defined twice", name)));
        }
    }

    let mut type_names = HashSet::new();
    for def in &program.type_definitions {
        if !type_names.insert(def.name.as_str()) {
            errors.push(VerifyError::module(format!("type %{} is defined twice", def.name)));
        }
    }
    for global in &program.globals {
        check_named_types(&global.ty, &type_names, &mut errors);
        if let Some(init) = &global.initializer {
            if init.ty() != global.ty {
                errors.push(VerifyError::module(format!(
                    "initializer of @{} does not match its type",
                    global.name
                )));
            }
        }
    }

    for function in &program.functions {
        for ty in function
            .signature
            .params
            .iter()
            .chain(std::iter::once(&function.signature.return_type))
        {
            check_named_types(ty, &type_names, &mut errors);
        }
        if !function.is_declaration() {
            verify_function(program, function, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_named_types(ty: &LirType, known: &HashSet<&str>, errors: &mut Vec<VerifyError>) {
    match ty {
        LirType::Named(name) if !known.contains(name.as_str()) => {
            errors.push(VerifyError::module(format!("type %{} is not defined", name)));
        }
        LirType::Ptr(inner) | LirType::Array(inner, _) | LirType::Vector(inner, _) => {
            check_named_types(inner, known, errors)
        }
        LirType::Struct { fields, .. } => {
            for field in fields {
                check_named_types(field, known, errors);
            }
        }
        LirType::Function {
            return_type,
            param_types,
            ..
        } => {
            check_named_types(return_type, known, errors);
            for param in param_types {
                check_named_types(param, known, errors);
            }
        }
        _ => {}
    }
}

fn verify_function(program: &LirProgram, function: &LirFunction, errors: &mut Vec<VerifyError>) {
    let block_ids = function
        .basic_blocks
        .iter()
        .map(|block| block.id)
        .collect::<HashSet<_>>();
    if block_ids.len() != function.basic_blocks.len() {
        errors.push(VerifyError::in_function(function, "duplicate basic block id"));
    }

    let mut registers: HashMap<RegisterId, LirType> = HashMap::new();
    for block in &function.basic_blocks {
        for inst in &block.instructions {
            for operand in inst.operands() {
                check_operand(program, function, operand, &registers, errors);
            }

            if let LirInstructionKind::Call { function: callee, args, .. } = &inst.kind {
                check_call(program, function, callee, args, &registers, errors);
            }

            if inst.defines_register() {
                let Some(ty) = inst.type_hint.clone() else {
                    errors.push(VerifyError::in_function(
                        function,
                        format!("%r{} has no result type", inst.id),
                    ));
                    continue;
                };
                if registers.insert(inst.id, ty).is_some() {
                    errors.push(VerifyError::in_function(
                        function,
                        format!("%r{} is defined twice", inst.id),
                    ));
                }
            }
        }

        for target in block.successors() {
            if !block_ids.contains(&target) {
                errors.push(VerifyError::in_function(
                    function,
                    format!("branch to missing block {}", target),
                ));
            }
        }

        match &block.terminator {
            LirTerminator::Return(value) => {
                let expected = &function.signature.return_type;
                match value {
                    None if !expected.is_void() => errors.push(VerifyError::in_function(
                        function,
                        "missing return value",
                    )),
                    Some(_) if expected.is_void() => errors.push(VerifyError::in_function(
                        function,
                        "void function returns a value",
                    )),
                    Some(value) => {
                        check_operand(program, function, value, &registers, errors);
                        if let Some(actual) = value_type(value, function, program, &registers) {
                            if &actual != expected {
                                errors.push(VerifyError::in_function(
                                    function,
                                    "return value does not match the return type",
                                ));
                            }
                        }
                    }
                    None => {}
                }
            }
            LirTerminator::CondBr { condition, .. } => {
                check_operand(program, function, condition, &registers, errors);
            }
            LirTerminator::Br(_) | LirTerminator::Unreachable => {}
        }
    }
}

fn check_operand(
    program: &LirProgram,
    function: &LirFunction,
    value: &LirValue,
    registers: &HashMap<RegisterId, LirType>,
    errors: &mut Vec<VerifyError>,
) {
    let problem = match value {
        LirValue::Register(id) if !registers.contains_key(id) => {
            Some(format!("%r{} is used before it is defined", id))
        }
        LirValue::Local(id) if function.local(*id).is_none() => {
            Some(format!("unknown local %{}", id))
        }
        LirValue::Global(name, _) if program.global(name).is_none() => {
            Some(format!("unknown global @{}", name))
        }
        LirValue::Function(name) if program.function(name).is_none() => {
            Some(format!("call to undeclared function @{}", name))
        }
        _ => None,
    };
    if let Some(message) = problem {
        errors.push(VerifyError::in_function(function, message));
    }
}

fn check_call(
    program: &LirProgram,
    function: &LirFunction,
    callee: &LirValue,
    args: &[LirValue],
    registers: &HashMap<RegisterId, LirType>,
    errors: &mut Vec<VerifyError>,
) {
    let LirValue::Function(name) = callee else {
        return;
    };
    let Some(callee) = program.function(name) else {
        return;
    };
    let expected = callee.signature.params.len();
    let arity_ok = if callee.signature.is_variadic {
        args.len() >= expected
    } else {
        args.len() == expected
    };
    if !arity_ok {
        errors.push(VerifyError::in_function(
            function,
            format!(
                "@{} takes {} arguments but {} were passed",
                name,
                expected,
                args.len()
            ),
        ));
        return;
    }

    for (index, (arg, param)) in args.iter().zip(&callee.signature.params).enumerate() {
        let Some(actual) = value_type(arg, function, program, registers) else {
            continue;
        };
        if &actual != param {
            errors.push(VerifyError::in_function(
                function,
                format!(
                    "argument {} of @{} has type {} but the declaration expects {}",
                    index,
                    name,
                    format_type(&actual),
                    format_type(param)
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{
        LirBasicBlock, LirConstant, LirFunctionSignature, LirGlobal, LirInstruction, Ty,
    };

    fn call(id: u32, name: &str, ret: Ty) -> LirInstruction {
        LirInstruction::new(
            id,
            LirInstructionKind::Call {
                function: LirValue::Function(name.into()),
                args: Vec::new(),
                calling_convention: Default::default(),
                tail_call: false,
            },
        )
        .with_type(ret)
    }

    fn returning_i32() -> LirFunction {
        let mut func = LirFunction::new(
            "f",
            LirFunctionSignature::new(Vec::new(), Ty::I32),
            Default::default(),
            Default::default(),
        );
        let mut entry = LirBasicBlock::new(0, Some("entry".into()));
        entry.add_instruction(call(1, "g", Ty::I32));
        entry.set_terminator(LirTerminator::Return(Some(LirValue::Register(1))));
        func.add_basic_block(entry);
        func
    }

    #[test]
    fn accepts_well_formed_module() {
        let mut program = LirProgram::new("m");
        program.add_function(LirFunction::declaration(
            "g",
            LirFunctionSignature::new(Vec::new(), Ty::I32),
        ));
        program.add_function(returning_i32());
        program.add_global(
            LirGlobal::new("counter", Ty::I32).with_initializer(LirConstant::Int(5, Ty::I32)),
        );
        assert_eq!(verify_program(&program), Ok(()));
    }

    #[test]
    fn reports_undeclared_callee() {
        let mut program = LirProgram::new("m");
        program.add_function(returning_i32());
        let errors = verify_program(&program).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "in @f: call to undeclared function @g");
    }

    #[test]
    fn reports_missing_branch_target_and_bad_return() {
        let mut program = LirProgram::new("m");
        let mut func = LirFunction::declaration("h", LirFunctionSignature::new(Vec::new(), Ty::Void));
        let mut entry = LirBasicBlock::new(0, None);
        entry.set_terminator(LirTerminator::Br(7));
        func.add_basic_block(entry);
        let mut exit = LirBasicBlock::new(1, None);
        exit.set_terminator(LirTerminator::Return(Some(LirValue::Constant(LirConstant::Int(
            0,
            Ty::I32,
        )))));
        func.add_basic_block(exit);
        program.add_function(func);

        let messages = verify_program(&program)
            .unwrap_err()
            .into_iter()
            .map(|err| err.message)
            .collect::<Vec<_>>();
        assert_eq!(
            messages,
            vec!["branch to missing block 7", "void function returns a value"]
        );
    }

    #[test]
    fn reports_call_arguments_that_do_not_match_the_declaration() {
        let mut program = LirProgram::new("m");
        program.add_function(LirFunction::declaration(
            "g",
            LirFunctionSignature::new(vec![Ty::opaque_ptr()], Ty::Void),
        ));
        let mut func = LirFunction::new(
            "f",
            LirFunctionSignature::new(vec![Ty::opaque_ptr()], Ty::Void),
            Default::default(),
            Default::default(),
        );
        let vector_ptr = Ty::ptr(Ty::Vector(Box::new(Ty::F32), 8));
        let mut entry = LirBasicBlock::new(0, None);
        entry.add_instruction(
            LirInstruction::new(1, LirInstructionKind::Bitcast(LirValue::Local(0), vector_ptr.clone()))
                .with_type(vector_ptr),
        );
        entry.add_instruction(
            LirInstruction::new(
                2,
                LirInstructionKind::Call {
                    function: LirValue::Function("g".into()),
                    args: vec![LirValue::Register(1)],
                    calling_convention: Default::default(),
                    tail_call: false,
                },
            )
            .with_type(Ty::Void),
        );
        entry.set_terminator(LirTerminator::Return(None));
        func.add_basic_block(entry);
        program.add_function(func);

        let errors = verify_program(&program).unwrap_err();
        assert_eq!(
            errors[0].to_string(),
            "in @f: argument 0 of @g has type <8 x float>* but the declaration expects i8*"
        );
    }

    #[test]
    fn reports_use_before_definition() {
        let mut program = LirProgram::new("m");
        let mut func = LirFunction::declaration("u", LirFunctionSignature::new(Vec::new(), Ty::I32));
        let mut entry = LirBasicBlock::new(0, None);
        entry.set_terminator(LirTerminator::Return(Some(LirValue::Register(9))));
        func.add_basic_block(entry);
        program.add_function(func);
        let errors = verify_program(&program).unwrap_err();
        assert_eq!(errors[0].message, "%r9 is used before it is defined");
    }

    #[test]
    fn reports_duplicate_symbols_and_unknown_types() {
        let mut program = LirProgram::new("m");
        program.add_global(LirGlobal::new("x", Ty::Named("Missing".into())));
        program.add_function(LirFunction::declaration(
            "x",
            LirFunctionSignature::new(Vec::new(), Ty::Void),
        ));
        let messages = verify_program(&program)
            .unwrap_err()
            .into_iter()
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        assert!(messages.contains(&"symbol @x is defined twice".to_string()));
        assert!(messages.contains(&"type %Missing is not defined".to_string()));
    }
}
