use super::runtime::RuntimeSymbols;
use super::DispatchPlan;
use crate::registry::ExportRegistry;
use crate::unify::copy_type_definitions;
use lanec_core::frontend::CompiledModule;
use lanec_core::lir::verify::verify_program;
use lanec_core::lir::{
    BasicBlockId, CallingConvention, LirBasicBlock, LirConstant, LirFunction, LirInstruction,
    LirInstructionKind, LirProgram, LirTerminator, LirValue, Linkage, Ty,
};
use tracing::{debug, info};

/// Builds one dispatch function per exported name into `dispatch`.
///
/// `modules` are the compiled modules of the build, indexed by the module
/// ids stored in the registry's variant handles.
///
/// # Panics
/// When `dispatch` lacks the runtime support symbols or the finished module
/// does not verify.
pub fn synthesize(
    registry: &ExportRegistry,
    modules: &[CompiledModule],
    dispatch: &mut LirProgram,
) -> Vec<DispatchPlan> {
    let runtime = RuntimeSymbols::locate(dispatch);
    let mut plans = Vec::new();
    for record in registry.all_records() {
        for variant in record.variants.values() {
            if let Some(module) = modules.get(variant.handle.module) {
                for param in &variant.signature.params {
                    copy_type_definitions(&param.ty, &module.program, dispatch);
                }
                copy_type_definitions(&variant.signature.return_type.ty, &module.program, dispatch);
            }
        }
        let plan = DispatchPlan::from_record(record);
        materialize(&plan, &runtime, dispatch);
        plans.push(plan);
    }

    if let Err(errors) = verify_program(dispatch) {
        let messages = errors
            .iter()
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        panic!("synthesized dispatch module is malformed: {}", messages);
    }
    info!("synthesized {} dispatch function(s)", plans.len());
    plans
}

/// Appends the function for `plan`, and declarations of the variants it
/// calls, to `dispatch`.
///
/// Variants are declared with their own pointer types for the opaque
/// parameters, so the casts before each call type-check.
pub fn materialize(plan: &DispatchPlan, runtime: &RuntimeSymbols, dispatch: &mut LirProgram) {
    for case in &plan.cases {
        if dispatch.function(&case.symbol).is_none() {
            let signature = case.declared_signature(&plan.signature);
            dispatch.add_function(
                LirFunction::declaration(case.symbol.clone(), signature)
                    .with_param_names(plan.param_names.iter().cloned()),
            );
        }
    }

    let mut builder = CascadeBuilder::new(plan);
    let mut current = builder.block("entry");
    builder.push(
        &mut current,
        LirInstructionKind::Call {
            function: runtime.set_system_isa.clone(),
            args: Vec::new(),
            calling_convention: CallingConvention::C,
            tail_call: false,
        },
        Ty::Void,
    );
    let best_isa = builder.push(
        &mut current,
        LirInstructionKind::Load {
            address: runtime.best_isa.clone(),
            alignment: Some(4),
            volatile: false,
        },
        Ty::I32,
    );

    for case in &plan.cases {
        let supported = builder.push(
            &mut current,
            LirInstructionKind::Ge(
                best_isa.clone(),
                LirValue::Constant(LirConstant::Int(i64::from(case.rank), Ty::I32)),
            ),
            Ty::I1,
        );
        let mut do_call = builder.block("do_call");
        let next_try = builder.block("next_try");
        current.set_terminator(LirTerminator::CondBr {
            condition: supported,
            if_true: do_call.id,
            if_false: next_try.id,
        });
        builder.finish(current);

        let mut args = Vec::with_capacity(case.casts.len());
        for (index, cast) in case.casts.iter().enumerate() {
            let arg = LirValue::Local(index as u32);
            args.push(match cast {
                Some(ty) => builder.push(
                    &mut do_call,
                    LirInstructionKind::Bitcast(arg, ty.clone()),
                    ty.clone(),
                ),
                None => arg,
            });
        }
        let result = builder.push(
            &mut do_call,
            LirInstructionKind::Call {
                function: LirValue::Function(case.symbol.clone()),
                args,
                calling_convention: CallingConvention::C,
                tail_call: false,
            },
            plan.signature.return_type.clone(),
        );
        do_call.set_terminator(LirTerminator::Return(
            (!plan.signature.return_type.is_void()).then_some(result),
        ));
        builder.finish(do_call);
        current = next_try;
    }

    // only reached if detection reports a rank below every variant
    builder.push(
        &mut current,
        LirInstructionKind::Call {
            function: runtime.abort.clone(),
            args: Vec::new(),
            calling_convention: CallingConvention::C,
            tail_call: false,
        },
        Ty::Void,
    );
    let return_type = &plan.signature.return_type;
    current.set_terminator(LirTerminator::Return(
        (!return_type.is_void()).then(|| LirValue::Undef(return_type.clone())),
    ));
    builder.finish(current);

    debug!(
        "dispatch function {} tests {} variant(s)",
        plan.name,
        plan.cases.len()
    );
    dispatch.add_function(builder.function);
}

struct CascadeBuilder {
    function: LirFunction,
    next_block: BasicBlockId,
    next_value: u32,
}

impl CascadeBuilder {
    fn new(plan: &DispatchPlan) -> Self {
        let function = LirFunction::new(
            plan.name.clone(),
            plan.signature.clone(),
            CallingConvention::C,
            Linkage::External,
        )
        .with_param_names(plan.param_names.iter().cloned());
        Self {
            function,
            next_block: 0,
            next_value: 1,
        }
    }

    fn block(&mut self, label: &str) -> LirBasicBlock {
        let block = LirBasicBlock::new(self.next_block, Some(label.to_string()));
        self.next_block += 1;
        block
    }

    fn push(&mut self, block: &mut LirBasicBlock, kind: LirInstructionKind, ty: Ty) -> LirValue {
        let id = self.next_value;
        self.next_value += 1;
        block.add_instruction(LirInstruction::new(id, kind).with_type(ty));
        LirValue::Register(id)
    }

    fn finish(&mut self, block: LirBasicBlock) {
        self.function.add_basic_block(block);
    }
}
