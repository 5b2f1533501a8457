//! Runtime ISA dispatch.
//!
//! For every exported name with compiled variants a [`DispatchPlan`] lists,
//! from the most capable ISA down, which variant to call once the host's
//! ISA rank is known. [`materialize`] turns a plan into a LIR function of the
//! dispatch module.

pub mod materialize;
pub mod runtime;

use crate::registry::MultiVersionRecord;
use lanec_core::lir::{LirFunctionSignature, Ty};
use lanec_core::target::Isa;

pub use materialize::{materialize, synthesize};
pub use runtime::{init_dispatch_module, RuntimeSymbols};

/// One row of the cascade: call `symbol` when the host rank is at least `rank`.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCase {
    pub isa: Isa,
    pub rank: i32,
    pub symbol: String,
    /// Per parameter, the variant's own type when it differs from the
    /// dispatch signature and the argument must be cast before the call.
    pub casts: Vec<Option<Ty>>,
}

impl DispatchCase {
    /// Signature the variant is declared with in the dispatch module: the
    /// dispatch signature with every cast parameter at its variant type.
    pub fn declared_signature(&self, dispatch: &LirFunctionSignature) -> LirFunctionSignature {
        let params = dispatch
            .params
            .iter()
            .zip(&self.casts)
            .map(|(param, cast)| cast.clone().unwrap_or_else(|| param.clone()))
            .collect();
        LirFunctionSignature {
            params,
            return_type: dispatch.return_type.clone(),
            is_variadic: dispatch.is_variadic,
        }
    }
}

/// Decision table of one dispatch function. Falling through every case traps.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    pub name: String,
    pub signature: LirFunctionSignature,
    pub param_names: Vec<String>,
    /// Parameters passed as untyped pointers because their pointee's layout
    /// depends on the vector width.
    pub opaque_params: Vec<bool>,
    /// Ordered by strictly decreasing rank.
    pub cases: Vec<DispatchCase>,
}

impl DispatchPlan {
    /// # Panics
    /// When the record holds no variant.
    pub fn from_record(record: &MultiVersionRecord) -> Self {
        let Some(base) = record.lowest() else {
            panic!("export {} has no compiled variant to dispatch to", record.name);
        };

        let opaque_params = base
            .signature
            .params
            .iter()
            .map(|param| param.is_pointer && param.pointee_is_varying)
            .collect::<Vec<_>>();
        let params = base
            .signature
            .params
            .iter()
            .zip(&opaque_params)
            .map(|(param, opaque)| {
                if *opaque {
                    Ty::opaque_ptr()
                } else {
                    param.ty.clone()
                }
            })
            .collect::<Vec<_>>();
        let signature =
            LirFunctionSignature::new(params, base.signature.return_type.ty.clone());

        let cases = record
            .by_priority()
            .map(|variant| DispatchCase {
                isa: variant.isa,
                rank: variant.isa.rank(),
                symbol: variant.handle.symbol.clone(),
                casts: variant
                    .signature
                    .params
                    .iter()
                    .zip(&signature.params)
                    .map(|(param, unified)| (&param.ty != unified).then(|| param.ty.clone()))
                    .collect(),
            })
            .collect();

        Self {
            name: record.name.clone(),
            signature,
            param_names: base.source.params.iter().map(|p| p.name.clone()).collect(),
            opaque_params,
            cases,
        }
    }

    /// Case taken on a host whose best ISA has `host_rank`; `None` traps.
    pub fn select(&self, host_rank: i32) -> Option<&DispatchCase> {
        self.cases.iter().find(|case| host_rank >= case.rank)
    }
}
