//! Runtime support carried by every dispatch module.

use lanec_core::lir::{
    CallingConvention, Linkage, LirBasicBlock, LirConstant, LirFunction, LirFunctionSignature,
    LirGlobal, LirInstruction, LirInstructionKind, LirProgram, LirTerminator, LirValue, Ty,
};
use lanec_core::target::Target;

pub const DISPATCH_MODULE_NAME: &str = "lanec_dispatch";
/// Cached rank of the best ISA of the executing machine, `-1` until set.
pub const SYSTEM_BEST_ISA: &str = "__system_best_isa";
/// Detection routine provided by `lanec-rt`.
pub const GET_SYSTEM_ISA: &str = "__get_system_isa";
pub const SET_SYSTEM_ISA: &str = "__set_system_isa";
pub const ABORT: &str = "abort";

const UNSET: i64 = -1;

/// Creates the dispatch module for a multi-target build, holding only the
/// ISA detection support.
pub fn init_dispatch_module(target: &Target) -> LirProgram {
    let mut program =
        LirProgram::new(DISPATCH_MODULE_NAME).with_target(target.triple(), target.data_layout());

    let best_isa = LirGlobal::new(SYSTEM_BEST_ISA, Ty::I32)
        .with_initializer(LirConstant::Int(UNSET, Ty::I32))
        .with_linkage(Linkage::Internal);
    let best_isa_address = best_isa.address();
    program.add_global(best_isa);

    program.add_function(LirFunction::declaration(
        GET_SYSTEM_ISA,
        LirFunctionSignature::new(Vec::new(), Ty::I32),
    ));
    program.add_function(set_system_isa(best_isa_address));
    program.add_function(LirFunction::declaration(
        ABORT,
        LirFunctionSignature::new(Vec::new(), Ty::Void),
    ));
    program
}

// stores __get_system_isa() into __system_best_isa unless already set
fn set_system_isa(best_isa: LirValue) -> LirFunction {
    let mut function = LirFunction::new(
        SET_SYSTEM_ISA,
        LirFunctionSignature::new(Vec::new(), Ty::Void),
        CallingConvention::C,
        Linkage::Internal,
    );

    let mut entry = LirBasicBlock::new(0, Some("entry".into()));
    entry.add_instruction(
        LirInstruction::new(
            1,
            LirInstructionKind::Load {
                address: best_isa.clone(),
                alignment: Some(4),
                volatile: false,
            },
        )
        .with_type(Ty::I32),
    );
    entry.add_instruction(
        LirInstruction::new(
            2,
            LirInstructionKind::Eq(
                LirValue::Register(1),
                LirValue::Constant(LirConstant::Int(UNSET, Ty::I32)),
            ),
        )
        .with_type(Ty::I1),
    );
    entry.set_terminator(LirTerminator::CondBr {
        condition: LirValue::Register(2),
        if_true: 1,
        if_false: 2,
    });

    let mut detect = LirBasicBlock::new(1, Some("detect".into()));
    detect.add_instruction(
        LirInstruction::new(
            3,
            LirInstructionKind::Call {
                function: LirValue::Function(GET_SYSTEM_ISA.into()),
                args: Vec::new(),
                calling_convention: CallingConvention::C,
                tail_call: false,
            },
        )
        .with_type(Ty::I32),
    );
    detect.add_instruction(LirInstruction::new(
        4,
        LirInstructionKind::Store {
            value: LirValue::Register(3),
            address: best_isa,
            alignment: Some(4),
            volatile: false,
        },
    ));
    detect.set_terminator(LirTerminator::Br(2));

    let mut done = LirBasicBlock::new(2, Some("done".into()));
    done.set_terminator(LirTerminator::Return(None));

    function.add_basic_block(entry);
    function.add_basic_block(detect);
    function.add_basic_block(done);
    function
}

/// The runtime symbols synthesized dispatch functions reference.
#[derive(Debug, Clone)]
pub struct RuntimeSymbols {
    pub best_isa: LirValue,
    pub set_system_isa: LirValue,
    pub abort: LirValue,
}

impl RuntimeSymbols {
    /// Looks the symbols up in a dispatch module.
    ///
    /// # Panics
    /// When the module was not created by [`init_dispatch_module`].
    pub fn locate(program: &LirProgram) -> Self {
        let Some(best_isa) = program.global(SYSTEM_BEST_ISA) else {
            panic!("dispatch module lacks @{}", SYSTEM_BEST_ISA);
        };
        for name in [GET_SYSTEM_ISA, SET_SYSTEM_ISA, ABORT] {
            if program.function(name).is_none() {
                panic!("dispatch module lacks @{}", name);
            }
        }
        Self {
            best_isa: best_isa.address(),
            set_system_isa: LirValue::Function(SET_SYSTEM_ISA.into()),
            abort: LirValue::Function(ABORT.into()),
        }
    }
}
