//! C declarations of source types, used by generated headers and stubs.

use super::{FunctionType, Type, Variability};

/// Which header a declaration is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclForm {
    /// Per-target header: types are spelled for the target's vector width.
    Target,
    /// Dispatch header: pointers to varying data become `void *`, since
    /// their pointee differs between targets.
    Dispatch,
}

#[derive(Debug, Clone, Copy)]
pub struct CDecl {
    width: u32,
    form: DeclForm,
}

/// Name of a struct as it appears in C.
pub fn c_struct_name(name: &str, variability: Variability, width: u32) -> String {
    match variability {
        Variability::Uniform => name.to_string(),
        Variability::Varying => format!("v{}_varying_{}", width, name),
        Variability::Soa(lanes) => format!("{}_SOA{}", name, lanes),
    }
}

/// Name of the short vector struct, e.g. `float4`.
pub fn c_vector_name(element: &Type, count: u32) -> String {
    let element = match element {
        Type::Atomic { atomic, .. } => atomic.vector_name().to_string(),
        Type::Enum { name, .. } => name.clone(),
        other => other.to_string(),
    };
    format!("{}{}", element, count)
}

fn qualified(base: String, is_const: bool) -> String {
    if is_const {
        format!("const {}", base)
    } else {
        base
    }
}

fn join(base: String, declarator: &str) -> String {
    if declarator.is_empty() {
        base
    } else {
        format!("{} {}", base, declarator)
    }
}

impl CDecl {
    pub fn new(width: u32, form: DeclForm) -> Self {
        Self { width, form }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Declares `name` with type `ty`. An empty name renders an abstract
    /// declarator, as used for casts and return types.
    pub fn declare(&self, ty: &Type, name: &str) -> String {
        match ty {
            Type::Atomic {
                atomic,
                variability,
                is_const,
            } => {
                let base = qualified(atomic.c_name().to_string(), *is_const);
                match variability {
                    Variability::Varying => join(base, &format!("{}[{}]", name, self.width)),
                    _ => join(base, name),
                }
            }
            Type::Enum {
                name: enum_name,
                variability,
                is_const,
            } => {
                let base = qualified(format!("enum {}", enum_name), *is_const);
                match variability {
                    Variability::Varying => join(base, &format!("{}[{}]", name, self.width)),
                    _ => join(base, name),
                }
            }
            Type::Struct {
                name: struct_name,
                variability,
                is_const,
            } => join(
                qualified(
                    format!("struct {}", c_struct_name(struct_name, *variability, self.width)),
                    *is_const,
                ),
                name,
            ),
            Type::Vector { element, count } => join(
                qualified(
                    format!("struct {}", c_vector_name(element, *count)),
                    element.is_const(),
                ),
                name,
            ),
            Type::Pointer {
                pointee, is_const, ..
            } => {
                let declarator = if *is_const {
                    format!("* const {}", name).trim_end().to_string()
                } else {
                    format!("*{}", name)
                };
                if self.form == DeclForm::Dispatch && pointee.is_varying() {
                    let base = qualified("void".into(), pointee.is_const());
                    return join(base, &declarator);
                }
                self.declare(pointee, &Self::parenthesize(pointee, declarator))
            }
            Type::Reference { target } => {
                if self.form == DeclForm::Dispatch && target.is_varying() {
                    let base = qualified("void".into(), target.is_const());
                    return join(base, &format!("*{}", name));
                }
                self.declare(target, &Self::parenthesize(target, format!("&{}", name)))
            }
            Type::Array { element, count } => {
                self.declare(element, &format!("{}[{}]", name, count))
            }
        }
    }

    // pointers to arrays, including varying atomics, need `(*name)[N]`
    fn parenthesize(inner: &Type, declarator: String) -> String {
        let array_like = inner.is_array()
            || matches!(
                inner,
                Type::Atomic {
                    variability: Variability::Varying,
                    ..
                }
            );
        if array_like {
            format!("({})", declarator)
        } else {
            declarator
        }
    }

    /// Full prototype of a function, without the trailing semicolon.
    pub fn function(&self, name: &str, func: &FunctionType) -> String {
        let params = if func.params.is_empty() {
            "void".to_string()
        } else {
            func.params
                .iter()
                .map(|param| self.declare(&param.ty, &param.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        self.declare(&func.return_type, &format!("{}({})", name, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AtomicKind, Param};

    fn float(variability: Variability) -> Type {
        Type::atomic(AtomicKind::Float, variability)
    }

    #[test]
    fn declares_pointers_and_arrays() {
        let decl = CDecl::new(8, DeclForm::Target);
        assert_eq!(decl.declare(&Type::pointer(float(Variability::Uniform)), "p"), "float *p");
        assert_eq!(
            decl.declare(
                &Type::Array {
                    element: Box::new(Type::atomic(AtomicKind::Int32, Variability::Uniform)),
                    count: 4
                },
                "a"
            ),
            "int32_t a[4]"
        );
        assert_eq!(decl.declare(&float(Variability::Varying), "x"), "float x[8]");
        assert_eq!(
            decl.declare(
                &Type::Reference {
                    target: Box::new(Type::structure("P", Variability::Uniform))
                },
                "r"
            ),
            "struct P &r"
        );
        assert_eq!(
            decl.declare(&Type::structure("P", Variability::Soa(4)), ""),
            "struct P_SOA4"
        );
    }

    #[test]
    fn dispatch_form_erases_varying_pointees() {
        let func = FunctionType {
            return_type: Type::void(),
            params: vec![
                Param {
                    name: "p".into(),
                    ty: Type::pointer(float(Variability::Varying)),
                },
                Param {
                    name: "n".into(),
                    ty: Type::atomic(AtomicKind::Int32, Variability::Uniform),
                },
            ],
            is_exported: true,
            is_extern_c: false,
        };
        assert_eq!(
            CDecl::new(8, DeclForm::Target).function("scale", &func),
            "void scale(float (*p)[8], int32_t n)"
        );
        assert_eq!(
            CDecl::new(8, DeclForm::Dispatch).function("scale", &func),
            "void scale(void *p, int32_t n)"
        );
    }

    #[test]
    fn empty_parameter_lists_are_void() {
        let func = FunctionType {
            return_type: Type::pointer(float(Variability::Uniform)),
            params: Vec::new(),
            is_exported: true,
            is_extern_c: false,
        };
        assert_eq!(CDecl::new(4, DeclForm::Target).function("get", &func), "float *get(void)");
    }
}
