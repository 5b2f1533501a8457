//! Source-level SPMD types.
//!
//! Every value type carries a [`Variability`]: uniform values hold one
//! instance shared by all program instances, varying values one instance per
//! lane. The physical form of a varying value depends on the target's vector
//! width, which is why the same source type lowers differently per target.

pub mod cdecl;

use crate::lir::{LirProgram, Ty};
use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variability {
    #[default]
    Uniform,
    Varying,
    /// Structure-of-arrays layout with the given lane count.
    Soa(u32),
}

impl Variability {
    pub fn is_varying(self) -> bool {
        matches!(self, Variability::Varying)
    }

    pub fn is_uniform(self) -> bool {
        matches!(self, Variability::Uniform)
    }

    pub fn soa_width(self) -> Option<u32> {
        match self {
            Variability::Soa(width) => Some(width),
            _ => None,
        }
    }
}

impl fmt::Display for Variability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variability::Uniform => write!(f, "uniform"),
            Variability::Varying => write!(f, "varying"),
            Variability::Soa(width) => write!(f, "soa{}", width),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicKind {
    Void,
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
}

impl AtomicKind {
    pub fn c_name(self) -> &'static str {
        match self {
            AtomicKind::Void => "void",
            AtomicKind::Bool => "bool",
            AtomicKind::Int8 => "int8_t",
            AtomicKind::UInt8 => "uint8_t",
            AtomicKind::Int16 => "int16_t",
            AtomicKind::UInt16 => "uint16_t",
            AtomicKind::Int32 => "int32_t",
            AtomicKind::UInt32 => "uint32_t",
            AtomicKind::Int64 => "int64_t",
            AtomicKind::UInt64 => "uint64_t",
            AtomicKind::Float => "float",
            AtomicKind::Double => "double",
        }
    }

    /// Element name used for short vector typedefs such as `float4`.
    pub fn vector_name(self) -> &'static str {
        match self {
            AtomicKind::Void => "void",
            AtomicKind::Bool => "bool",
            AtomicKind::Int8 => "int8",
            AtomicKind::UInt8 => "uint8",
            AtomicKind::Int16 => "int16",
            AtomicKind::UInt16 => "uint16",
            AtomicKind::Int32 => "int32",
            AtomicKind::UInt32 => "uint32",
            AtomicKind::Int64 => "int64",
            AtomicKind::UInt64 => "uint64",
            AtomicKind::Float => "float",
            AtomicKind::Double => "double",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, AtomicKind::Float | AtomicKind::Double)
    }

    /// Scalar LIR type of one lane.
    pub fn scalar(self) -> Ty {
        match self {
            AtomicKind::Void => Ty::Void,
            AtomicKind::Bool => Ty::I1,
            AtomicKind::Int8 | AtomicKind::UInt8 => Ty::I8,
            AtomicKind::Int16 | AtomicKind::UInt16 => Ty::I16,
            AtomicKind::Int32 | AtomicKind::UInt32 => Ty::I32,
            AtomicKind::Int64 | AtomicKind::UInt64 => Ty::I64,
            AtomicKind::Float => Ty::F32,
            AtomicKind::Double => Ty::F64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Type {
    Atomic {
        atomic: AtomicKind,
        #[serde(default)]
        variability: Variability,
        #[serde(default)]
        is_const: bool,
    },
    Enum {
        name: String,
        #[serde(default)]
        variability: Variability,
        #[serde(default)]
        is_const: bool,
    },
    Pointer {
        pointee: Box<Type>,
        /// Variability of the pointer value itself.
        #[serde(default)]
        variability: Variability,
        #[serde(default)]
        is_const: bool,
    },
    Array {
        element: Box<Type>,
        count: u32,
    },
    Reference {
        target: Box<Type>,
    },
    /// Short vector such as `float<4>`.
    Vector {
        element: Box<Type>,
        count: u32,
    },
    Struct {
        name: String,
        #[serde(default)]
        variability: Variability,
        #[serde(default)]
        is_const: bool,
    },
}

impl Type {
    pub fn atomic(atomic: AtomicKind, variability: Variability) -> Self {
        Type::Atomic {
            atomic,
            variability,
            is_const: false,
        }
    }

    pub fn void() -> Self {
        Type::atomic(AtomicKind::Void, Variability::Uniform)
    }

    pub fn pointer(pointee: Type) -> Self {
        Type::Pointer {
            pointee: Box::new(pointee),
            variability: Variability::Uniform,
            is_const: false,
        }
    }

    pub fn structure(name: impl Into<String>, variability: Variability) -> Self {
        Type::Struct {
            name: name.into(),
            variability,
            is_const: false,
        }
    }

    pub fn variability(&self) -> Variability {
        match self {
            Type::Atomic { variability, .. }
            | Type::Enum { variability, .. }
            | Type::Pointer { variability, .. }
            | Type::Struct { variability, .. } => *variability,
            Type::Array { element, .. } | Type::Vector { element, .. } => element.variability(),
            Type::Reference { target } => target.variability(),
        }
    }

    pub fn is_varying(&self) -> bool {
        self.variability().is_varying()
    }

    pub fn is_void(&self) -> bool {
        matches!(
            self,
            Type::Atomic {
                atomic: AtomicKind::Void,
                ..
            }
        )
    }

    pub fn is_const(&self) -> bool {
        match self {
            Type::Atomic { is_const, .. }
            | Type::Enum { is_const, .. }
            | Type::Pointer { is_const, .. }
            | Type::Struct { is_const, .. } => *is_const,
            Type::Array { element, .. } | Type::Vector { element, .. } => element.is_const(),
            Type::Reference { target } => target.is_const(),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Reference { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct { .. })
    }

    pub fn struct_name(&self) -> Option<&str> {
        match self {
            Type::Struct { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    /// Pointer or reference whose target is per-lane data. Its physical type
    /// depends on the vector width.
    pub fn points_to_varying(&self) -> bool {
        match self {
            Type::Pointer { pointee, .. } => pointee.is_varying(),
            Type::Reference { target } => target.is_varying(),
            _ => false,
        }
    }

    /// Same type with the given variability. Aggregates recurse into their
    /// element; references keep their target.
    pub fn with_variability(&self, new: Variability) -> Type {
        let mut ty = self.clone();
        match &mut ty {
            Type::Atomic { variability, .. }
            | Type::Enum { variability, .. }
            | Type::Pointer { variability, .. }
            | Type::Struct { variability, .. } => *variability = new,
            Type::Array { element, .. } | Type::Vector { element, .. } => {
                **element = element.with_variability(new)
            }
            Type::Reference { .. } => {}
        }
        ty
    }

    /// Struct names this type mentions, in first-use order.
    pub fn referenced_structs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Type::Struct { name, .. } => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Type::Pointer { pointee: inner, .. }
            | Type::Array { element: inner, .. }
            | Type::Vector { element: inner, .. }
            | Type::Reference { target: inner } => inner.referenced_structs(out),
            Type::Atomic { .. } | Type::Enum { .. } => {}
        }
    }
}

fn write_qualifiers(
    f: &mut fmt::Formatter<'_>,
    variability: &Variability,
    is_const: &bool,
) -> fmt::Result {
    if *is_const {
        write!(f, "const ")?;
    }
    write!(f, "{} ", variability)
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Atomic {
                atomic,
                variability,
                is_const,
            } => {
                write_qualifiers(f, variability, is_const)?;
                write!(f, "{}", atomic.vector_name())
            }
            Type::Enum {
                name,
                variability,
                is_const,
            } => {
                write_qualifiers(f, variability, is_const)?;
                write!(f, "enum {}", name)
            }
            Type::Struct {
                name,
                variability,
                is_const,
            } => {
                write_qualifiers(f, variability, is_const)?;
                write!(f, "struct {}", name)
            }
            Type::Pointer {
                pointee,
                variability,
                is_const,
            } => {
                write!(f, "{} * {}", pointee, variability)?;
                if *is_const {
                    write!(f, " const")?;
                }
                Ok(())
            }
            Type::Array { element, count } => write!(f, "{}[{}]", element, count),
            Type::Vector { element, count } => write!(f, "{}<{}>", element, count),
            Type::Reference { target } => write!(f, "{} &", target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructType {
    /// Type of a field inside an instance with the given variability. A
    /// varying instance makes its atomic and enum fields varying.
    pub fn field_type(&self, field: &StructField, variability: Variability) -> Type {
        match (&field.ty, variability) {
            (Type::Atomic { .. } | Type::Enum { .. }, Variability::Varying)
                if field.ty.variability().is_uniform() =>
            {
                field.ty.with_variability(Variability::Varying)
            }
            (Type::Struct { .. }, Variability::Varying) => {
                field.ty.with_variability(Variability::Varying)
            }
            _ => field.ty.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionType {
    pub return_type: Type,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default)]
    pub is_extern_c: bool,
}

impl FunctionType {
    pub fn param_types(&self) -> impl Iterator<Item = &Type> {
        self.params.iter().map(|param| &param.ty)
    }
}

/// Struct and enum definitions of one program, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRegistry {
    #[serde(default)]
    pub structs: Vec<StructType>,
    #[serde(default)]
    pub enums: Vec<EnumType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_struct(&mut self, def: StructType) {
        if self.get_struct(&def.name).is_none() {
            self.structs.push(def);
        }
    }

    pub fn add_enum(&mut self, def: EnumType) {
        if self.get_enum(&def.name).is_none() {
            self.enums.push(def);
        }
    }

    pub fn get_struct(&self, name: &str) -> Option<&StructType> {
        self.structs.iter().find(|def| def.name == name)
    }

    pub fn get_enum(&self, name: &str) -> Option<&EnumType> {
        self.enums.iter().find(|def| def.name == name)
    }

    /// Whether the struct, or a struct nested in it by value, holds a
    /// pointer to varying data.
    pub fn has_varying_pointer(&self, name: &str) -> bool {
        let mut seen = HashSet::new();
        self.has_varying_pointer_inner(name, &mut seen)
    }

    fn has_varying_pointer_inner<'a>(&'a self, name: &'a str, seen: &mut HashSet<&'a str>) -> bool {
        if !seen.insert(name) {
            return false;
        }
        let Some(def) = self.get_struct(name) else {
            return false;
        };
        def.fields.iter().any(|field| match &field.ty {
            ty if ty.points_to_varying() => true,
            Type::Struct { name, .. } => self.has_varying_pointer_inner(name, seen),
            Type::Array { element, .. } => match element.as_ref() {
                ty if ty.points_to_varying() => true,
                Type::Struct { name, .. } => self.has_varying_pointer_inner(name, seen),
                _ => false,
            },
            _ => false,
        })
    }
}

/// Name of the LIR type definition for a struct at a vector width.
pub fn lir_struct_name(name: &str, width: u32, variability: Variability) -> String {
    format!("v{}_{}_{}", width, variability, name)
}

/// Lowers source types to LIR types for one target. Struct definitions are
/// added to the program on first use.
pub struct Lowering<'a> {
    target: &'a Target,
    registry: &'a TypeRegistry,
    in_progress: HashSet<String>,
}

impl<'a> Lowering<'a> {
    pub fn new(target: &'a Target, registry: &'a TypeRegistry) -> Self {
        Self {
            target,
            registry,
            in_progress: HashSet::new(),
        }
    }

    fn widen(&self, scalar: Ty, variability: Variability) -> Ty {
        match variability {
            Variability::Uniform => scalar,
            Variability::Varying => Ty::Vector(Box::new(scalar), self.target.vector_width()),
            Variability::Soa(width) => Ty::Array(Box::new(scalar), u64::from(width)),
        }
    }

    pub fn lower(&mut self, ty: &Type, program: &mut LirProgram) -> Ty {
        match ty {
            Type::Atomic {
                atomic: AtomicKind::Void,
                ..
            } => Ty::Void,
            Type::Atomic {
                atomic: AtomicKind::Bool,
                variability: Variability::Varying,
                ..
            } => Ty::Vector(
                Box::new(Ty::int(self.target.mask_bits())),
                self.target.vector_width(),
            ),
            Type::Atomic {
                atomic,
                variability,
                ..
            } => self.widen(atomic.scalar(), *variability),
            Type::Enum { variability, .. } => self.widen(Ty::I32, *variability),
            Type::Pointer {
                pointee,
                variability,
                ..
            } => match variability {
                Variability::Uniform => Ty::ptr(self.lower(pointee, program)),
                // varying pointers are vectors of addresses
                _ => self.widen(Ty::int(self.target.pointer_bits()), *variability),
            },
            Type::Array { element, count } => {
                Ty::Array(Box::new(self.lower(element, program)), u64::from(*count))
            }
            Type::Reference { target } => Ty::ptr(self.lower(target, program)),
            Type::Vector { element, count } => match self.lower(element, program) {
                vector @ Ty::Vector(..) => Ty::Array(Box::new(vector), u64::from(*count)),
                scalar => Ty::Vector(Box::new(scalar), *count),
            },
            Type::Struct {
                name, variability, ..
            } => self.lower_struct(name, *variability, program),
        }
    }

    fn lower_struct(&mut self, name: &str, variability: Variability, program: &mut LirProgram) -> Ty {
        let lir_name = lir_struct_name(name, self.target.vector_width(), variability);
        if program.type_definition(&lir_name).is_some() || self.in_progress.contains(&lir_name) {
            return Ty::Named(lir_name);
        }
        let Some(def) = self.registry.get_struct(name) else {
            tracing::warn!("struct {} is not defined; lowering it as opaque", name);
            program.add_type_definition(
                lir_name.clone(),
                Ty::Struct {
                    fields: Vec::new(),
                    packed: false,
                },
            );
            return Ty::Named(lir_name);
        };

        self.in_progress.insert(lir_name.clone());
        let fields = def
            .fields
            .iter()
            .map(|field| {
                let field_ty = def.field_type(field, variability);
                self.lower(&field_ty, program)
            })
            .collect();
        self.in_progress.remove(&lir_name);
        program.add_type_definition(
            lir_name.clone(),
            Ty::Struct {
                fields,
                packed: false,
            },
        );
        Ty::Named(lir_name)
    }
}
