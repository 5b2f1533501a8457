#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    I1,
    I8,
    I16,
    I32,
    I64,
    I128,
    F32,
    F64,
    Ptr(Box<Ty>),
    Array(Box<Ty>, u64),
    Struct {
        fields: Vec<Ty>,
        packed: bool,
    },
    /// Reference to a module-level type definition. Lets a struct point at
    /// itself.
    Named(String),
    Function {
        return_type: Box<Ty>,
        param_types: Vec<Ty>,
        is_variadic: bool,
    },
    Vector(Box<Ty>, u32),
    Void,
}

impl Ty {
    pub fn ptr(pointee: Ty) -> Ty {
        Ty::Ptr(Box::new(pointee))
    }

    /// `i8*`, the closest thing to `void *`.
    pub fn opaque_ptr() -> Ty {
        Ty::ptr(Ty::I8)
    }

    pub fn int(bits: u32) -> Ty {
        match bits {
            1 => Ty::I1,
            8 => Ty::I8,
            16 => Ty::I16,
            32 => Ty::I32,
            64 => Ty::I64,
            _ => Ty::I128,
        }
    }

    pub fn pointee(&self) -> Option<&Ty> {
        match self {
            Ty::Ptr(pointee) => Some(pointee),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }

    /// Types holding a value that a `ret` or a call argument can carry.
    pub fn is_first_class(&self) -> bool {
        !matches!(self, Ty::Void | Ty::Function { .. })
    }
}
