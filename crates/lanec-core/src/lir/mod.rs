//! Low-level IR consumed by code generation backends.
//!
//! The model mirrors an LLVM module closely enough that the textual printer
//! can render it as `.ll` assembly: typed pointers, SSA registers numbered by
//! instruction id, and functions without blocks acting as declarations.

pub mod compat;
pub mod layout;
pub mod pretty;
pub mod ty;
pub mod verify;

pub use ty::Ty;
pub type LirType = Ty;
pub type LirId = u32;
pub type RegisterId = u32;
pub type BasicBlockId = u32;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LirProgram {
    pub name: String,
    pub target_triple: Option<String>,
    pub data_layout: Option<String>,
    pub type_definitions: Vec<LirTypeDefinition>,
    pub globals: Vec<LirGlobal>,
    pub functions: Vec<LirFunction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LirFunction {
    pub name: String,
    pub signature: LirFunctionSignature,
    pub basic_blocks: Vec<LirBasicBlock>,
    pub locals: Vec<LirLocal>,
    pub calling_convention: CallingConvention,
    pub linkage: Linkage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LirFunctionSignature {
    pub params: Vec<LirType>,
    pub return_type: LirType,
    pub is_variadic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LirBasicBlock {
    pub id: BasicBlockId,
    pub label: Option<String>,
    pub instructions: Vec<LirInstruction>,
    pub terminator: LirTerminator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LirInstruction {
    pub id: LirId,
    pub kind: LirInstructionKind,
    /// Type of the produced value; `None` for instructions without a result.
    pub type_hint: Option<LirType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LirInstructionKind {
    // Arithmetic operations
    Add(LirValue, LirValue),
    Sub(LirValue, LirValue),
    Mul(LirValue, LirValue),

    // Bitwise operations
    And(LirValue, LirValue),
    Or(LirValue, LirValue),
    Xor(LirValue, LirValue),

    // Signed integer comparisons
    Eq(LirValue, LirValue),
    Ne(LirValue, LirValue),
    Lt(LirValue, LirValue),
    Le(LirValue, LirValue),
    Gt(LirValue, LirValue),
    Ge(LirValue, LirValue),

    // Memory operations
    Load {
        address: LirValue,
        alignment: Option<u32>,
        volatile: bool,
    },
    Store {
        value: LirValue,
        address: LirValue,
        alignment: Option<u32>,
        volatile: bool,
    },

    Bitcast(LirValue, LirType),

    Call {
        function: LirValue,
        args: Vec<LirValue>,
        calling_convention: CallingConvention,
        tail_call: bool,
    },

    Unreachable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LirTerminator {
    Return(Option<LirValue>),
    Br(BasicBlockId),
    CondBr {
        condition: LirValue,
        if_true: BasicBlockId,
        if_false: BasicBlockId,
    },
    Unreachable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LirValue {
    /// Result of the instruction with this id.
    Register(RegisterId),
    Constant(LirConstant),
    /// Address of a global; the type is the pointer type of the address.
    Global(String, Ty),
    Function(String),
    /// Argument or local slot of the enclosing function.
    Local(u32),
    Undef(LirType),
    Null(LirType),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LirConstant {
    Int(i64, LirType),
    Float(f64, LirType),
    Bool(bool),
    Vector(Vec<LirConstant>, LirType),
    Array(Vec<LirConstant>, LirType),
    Struct(Vec<LirConstant>, LirType),
    /// All-zero value of any type (`zeroinitializer`, `0`, `null`).
    Zero(LirType),
    Null(LirType),
    Undef(LirType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LirGlobal {
    pub name: String,
    pub ty: LirType,
    pub initializer: Option<LirConstant>,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub is_constant: bool,
    pub alignment: Option<u32>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LirTypeDefinition {
    pub name: String,
    pub ty: LirType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LirLocal {
    pub id: u32,
    pub ty: LirType,
    pub name: Option<String>,
    pub is_argument: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingConvention {
    #[default]
    C,
    Fast,
    Cold,
    X86VectorCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Linkage {
    #[default]
    External,
    Internal,
    Private,
    LinkOnceOdr,
    WeakAny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Default,
    Hidden,
    Protected,
}

// Implementation helpers
impl LirProgram {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, triple: impl Into<String>, data_layout: impl Into<String>) -> Self {
        self.target_triple = Some(triple.into());
        self.data_layout = Some(data_layout.into());
        self
    }

    pub fn add_function(&mut self, function: LirFunction) {
        self.functions.push(function);
    }

    pub fn add_global(&mut self, global: LirGlobal) {
        self.globals.push(global);
    }

    pub fn add_type_definition(&mut self, name: impl Into<String>, ty: LirType) {
        let name = name.into();
        if self.type_definition(&name).is_none() {
            self.type_definitions.push(LirTypeDefinition { name, ty });
        }
    }

    pub fn function(&self, name: &str) -> Option<&LirFunction> {
        self.functions.iter().find(|func| func.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&LirGlobal> {
        self.globals.iter().find(|global| global.name == name)
    }

    pub fn global_mut(&mut self, name: &str) -> Option<&mut LirGlobal> {
        self.globals.iter_mut().find(|global| global.name == name)
    }

    pub fn type_definition(&self, name: &str) -> Option<&LirType> {
        self.type_definitions
            .iter()
            .find(|def| def.name == name)
            .map(|def| &def.ty)
    }
}

impl LirFunction {
    pub fn new(
        name: impl Into<String>,
        signature: LirFunctionSignature,
        calling_convention: CallingConvention,
        linkage: Linkage,
    ) -> Self {
        let locals = signature
            .params
            .iter()
            .enumerate()
            .map(|(idx, ty)| LirLocal {
                id: idx as u32,
                ty: ty.clone(),
                name: None,
                is_argument: true,
            })
            .collect();
        Self {
            name: name.into(),
            signature,
            basic_blocks: Vec::new(),
            locals,
            calling_convention,
            linkage,
        }
    }

    /// External declaration with the C calling convention.
    pub fn declaration(name: impl Into<String>, signature: LirFunctionSignature) -> Self {
        Self::new(name, signature, CallingConvention::C, Linkage::External)
    }

    pub fn with_param_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for (local, name) in self.locals.iter_mut().zip(names) {
            local.name = Some(name.into());
        }
        self
    }

    pub fn is_declaration(&self) -> bool {
        self.basic_blocks.is_empty()
    }

    pub fn add_basic_block(&mut self, block: LirBasicBlock) {
        self.basic_blocks.push(block);
    }

    pub fn get_basic_block(&self, id: BasicBlockId) -> Option<&LirBasicBlock> {
        self.basic_blocks.iter().find(|bb| bb.id == id)
    }

    pub fn get_basic_block_mut(&mut self, id: BasicBlockId) -> Option<&mut LirBasicBlock> {
        self.basic_blocks.iter_mut().find(|bb| bb.id == id)
    }

    pub fn local(&self, id: u32) -> Option<&LirLocal> {
        self.locals.iter().find(|local| local.id == id)
    }

    pub fn function_type(&self) -> LirType {
        self.signature.as_type()
    }
}

impl LirFunctionSignature {
    pub fn new(params: Vec<LirType>, return_type: LirType) -> Self {
        Self {
            params,
            return_type,
            is_variadic: false,
        }
    }

    pub fn as_type(&self) -> LirType {
        LirType::Function {
            return_type: Box::new(self.return_type.clone()),
            param_types: self.params.clone(),
            is_variadic: self.is_variadic,
        }
    }
}

impl LirBasicBlock {
    pub fn new(id: BasicBlockId, label: Option<String>) -> Self {
        Self {
            id,
            label,
            instructions: Vec::new(),
            terminator: LirTerminator::Unreachable,
        }
    }

    pub fn add_instruction(&mut self, instruction: LirInstruction) {
        self.instructions.push(instruction);
    }

    pub fn set_terminator(&mut self, terminator: LirTerminator) {
        self.terminator = terminator;
    }

    pub fn successors(&self) -> Vec<BasicBlockId> {
        match &self.terminator {
            LirTerminator::Br(target) => vec![*target],
            LirTerminator::CondBr {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            LirTerminator::Return(_) | LirTerminator::Unreachable => Vec::new(),
        }
    }
}

impl LirInstruction {
    pub fn new(id: LirId, kind: LirInstructionKind) -> Self {
        Self {
            id,
            kind,
            type_hint: None,
        }
    }

    pub fn with_type(mut self, ty: LirType) -> Self {
        self.type_hint = Some(ty);
        self
    }

    /// Whether the instruction defines register `%r<id>`.
    pub fn defines_register(&self) -> bool {
        match &self.kind {
            LirInstructionKind::Store { .. } | LirInstructionKind::Unreachable => false,
            LirInstructionKind::Call { .. } => {
                matches!(&self.type_hint, Some(ty) if !ty.is_void())
            }
            _ => true,
        }
    }

    pub fn operands(&self) -> Vec<&LirValue> {
        use LirInstructionKind::*;
        match &self.kind {
            Add(a, b) | Sub(a, b) | Mul(a, b) | And(a, b) | Or(a, b) | Xor(a, b) | Eq(a, b)
            | Ne(a, b) | Lt(a, b) | Le(a, b) | Gt(a, b) | Ge(a, b) => vec![a, b],
            Load { address, .. } => vec![address],
            Store { value, address, .. } => vec![value, address],
            Bitcast(value, _) => vec![value],
            Call { function, args, .. } => std::iter::once(function).chain(args.iter()).collect(),
            Unreachable => Vec::new(),
        }
    }
}

impl LirGlobal {
    pub fn new(name: impl Into<String>, ty: LirType) -> Self {
        Self {
            name: name.into(),
            ty,
            initializer: None,
            linkage: Linkage::External,
            visibility: Visibility::Default,
            is_constant: false,
            alignment: None,
            section: None,
        }
    }

    pub fn with_initializer(mut self, initializer: LirConstant) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn constant(mut self, is_constant: bool) -> Self {
        self.is_constant = is_constant;
        self
    }

    pub fn is_declaration(&self) -> bool {
        self.initializer.is_none()
    }

    /// Value naming the global's address.
    pub fn address(&self) -> LirValue {
        LirValue::Global(self.name.clone(), Ty::ptr(self.ty.clone()))
    }
}

impl LirConstant {
    pub fn ty(&self) -> LirType {
        match self {
            LirConstant::Int(_, ty)
            | LirConstant::Float(_, ty)
            | LirConstant::Vector(_, ty)
            | LirConstant::Array(_, ty)
            | LirConstant::Struct(_, ty)
            | LirConstant::Zero(ty)
            | LirConstant::Null(ty)
            | LirConstant::Undef(ty) => ty.clone(),
            LirConstant::Bool(_) => Ty::I1,
        }
    }
}

/// Resolves the type of a value inside a function. Registers are looked up
/// in `registers`, which the caller fills from instruction type hints.
pub fn value_type(
    value: &LirValue,
    function: &LirFunction,
    program: &LirProgram,
    registers: &std::collections::HashMap<RegisterId, LirType>,
) -> Option<LirType> {
    match value {
        LirValue::Register(id) => registers.get(id).cloned(),
        LirValue::Constant(constant) => Some(constant.ty()),
        LirValue::Global(_, ty) => Some(ty.clone()),
        LirValue::Function(name) => program
            .function(name)
            .map(|callee| Ty::ptr(callee.function_type())),
        LirValue::Local(id) => function.local(*id).map(|local| local.ty.clone()),
        LirValue::Undef(ty) | LirValue::Null(ty) => Some(ty.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functions_without_blocks_are_declarations() {
        let sig = LirFunctionSignature::new(vec![Ty::I32, Ty::opaque_ptr()], Ty::Void);
        let mut func = LirFunction::declaration("f", sig).with_param_names(["n", "data"]);
        assert!(func.is_declaration());
        assert_eq!(func.locals.len(), 2);
        assert_eq!(func.local(1).and_then(|l| l.name.as_deref()), Some("data"));

        func.add_basic_block(LirBasicBlock::new(0, Some("entry".into())));
        assert!(!func.is_declaration());
    }

    #[test]
    fn void_calls_do_not_define_registers() {
        let call = LirInstruction::new(
            3,
            LirInstructionKind::Call {
                function: LirValue::Function("abort".into()),
                args: Vec::new(),
                calling_convention: CallingConvention::C,
                tail_call: false,
            },
        )
        .with_type(Ty::Void);
        assert!(!call.defines_register());
        assert!(call.clone().with_type(Ty::I32).defines_register());
        assert_eq!(call.operands().len(), 1);
    }

    #[test]
    fn type_definitions_are_added_once() {
        let mut program = LirProgram::new("m");
        program.add_type_definition("P", Ty::Struct { fields: vec![Ty::F32], packed: false });
        program.add_type_definition("P", Ty::Struct { fields: vec![Ty::F64], packed: false });
        assert_eq!(program.type_definitions.len(), 1);
        assert_eq!(
            program.type_definition("P"),
            Some(&Ty::Struct { fields: vec![Ty::F32], packed: false })
        );
    }
}
