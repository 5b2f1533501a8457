//! Export registry: every compiled variant of every exported function,
//! collected across the passes of a multi-target build.

use lanec_core::frontend::CompiledModule;
use lanec_core::lir::{LirFunctionSignature, Ty};
use lanec_core::target::Isa;
use lanec_core::types::{FunctionType, Type, TypeRegistry};
use std::collections::BTreeMap;
use tracing::debug;

/// Index of a compiled module kept alive by the driver.
pub type ModuleId = usize;

/// Reference to a function inside one of the build's compiled modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantHandle {
    pub module: ModuleId,
    pub symbol: String,
}

/// Physical type of one parameter or return value, plus what dispatch needs
/// to know about its source type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueDescriptor {
    pub ty: Ty,
    pub is_pointer: bool,
    /// The pointee's representation depends on the vector width.
    pub pointee_is_varying: bool,
}

impl ValueDescriptor {
    pub fn describe(source: &Type, ty: Ty, types: &TypeRegistry) -> Self {
        let is_pointer = source.is_pointer() || source.is_reference();
        let target = match source {
            Type::Pointer { pointee, .. } => Some(pointee.as_ref()),
            Type::Reference { target } => Some(target.as_ref()),
            _ => None,
        };
        let pointee_is_varying = match target {
            Some(target) if target.is_varying() => true,
            Some(Type::Struct { name, .. }) => types.has_varying_pointer(name),
            _ => false,
        };
        Self {
            ty,
            is_pointer,
            pointee_is_varying,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantSignature {
    pub params: Vec<ValueDescriptor>,
    pub return_type: ValueDescriptor,
}

impl VariantSignature {
    pub fn lir(&self) -> LirFunctionSignature {
        LirFunctionSignature::new(
            self.params.iter().map(|param| param.ty.clone()).collect(),
            self.return_type.ty.clone(),
        )
    }
}

/// Target specific compiled form of one exported function.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledVariant {
    pub isa: Isa,
    pub handle: VariantHandle,
    pub signature: VariantSignature,
    pub source: FunctionType,
}

/// All variants of one exported name, keyed by ISA. The map iterates in
/// capability order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVersionRecord {
    pub name: String,
    pub variants: BTreeMap<Isa, CompiledVariant>,
}

impl MultiVersionRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn get(&self, isa: Isa) -> Option<&CompiledVariant> {
        self.variants.get(&isa)
    }

    /// Variants from the most capable ISA down.
    pub fn by_priority(&self) -> impl Iterator<Item = &CompiledVariant> {
        self.variants.values().rev()
    }

    pub fn lowest(&self) -> Option<&CompiledVariant> {
        self.variants.values().next()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportRegistry {
    records: BTreeMap<String, MultiVersionRecord>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `variant` in the slot of its ISA, replacing what was there.
    pub fn record(&mut self, name: &str, variant: CompiledVariant) {
        let record = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| MultiVersionRecord::new(name));
        if record.variants.insert(variant.isa, variant).is_some() {
            debug!("replaced an earlier variant of {}", name);
        }
    }

    /// Records with at least one variant, ordered by name.
    pub fn all_records(&self) -> impl Iterator<Item = &MultiVersionRecord> {
        self.records.values().filter(|record| !record.is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&MultiVersionRecord> {
        self.records.get(name)
    }

    pub fn len(&self) -> usize {
        self.all_records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records every exported function of a module compiled for `isa`.
    /// Returns how many variants were recorded.
    pub fn record_module(&mut self, id: ModuleId, isa: Isa, module: &CompiledModule) -> usize {
        let mut recorded = 0;
        for symbol in module.symbols.exported_functions() {
            let Some(function) = module.program.function(&symbol.symbol) else {
                debug!("exported function {} has no LIR body", symbol.name);
                continue;
            };
            let params = symbol
                .ty
                .param_types()
                .zip(function.signature.params.iter())
                .map(|(source, ty)| ValueDescriptor::describe(source, ty.clone(), &module.types))
                .collect();
            let return_type = ValueDescriptor::describe(
                &symbol.ty.return_type,
                function.signature.return_type.clone(),
                &module.types,
            );
            self.record(
                &symbol.name,
                CompiledVariant {
                    isa,
                    handle: VariantHandle {
                        module: id,
                        symbol: symbol.symbol.clone(),
                    },
                    signature: VariantSignature {
                        params,
                        return_type,
                    },
                    source: symbol.ty.clone(),
                },
            );
            recorded += 1;
        }
        recorded
    }
}
