//! Cross-target global unification.
//!
//! Each target pass produces a module defining the program's globals. Only
//! one definition may reach the link, so the definitions move into the
//! dispatch module and every per-target module keeps a declaration.

use lanec_core::diagnostics::{Diagnostic, DiagnosticManager};
use lanec_core::frontend::SymbolTable;
use lanec_core::lir::compat::{compatible, TypeScope};
use lanec_core::lir::{Linkage, LirGlobal, LirProgram, Ty};
use tracing::debug;

/// Moves the initialized external globals of `source` into `dispatch`.
///
/// The first target's definitions become authoritative. For later targets
/// the global must already exist in `dispatch`; a differing layout is
/// reported as a warning and the build goes on. Returns the number of
/// globals turned into declarations.
pub fn unify_globals(
    source: &mut LirProgram,
    symbols: &SymbolTable,
    dispatch: &mut LirProgram,
    is_first_target: bool,
    diagnostics: &DiagnosticManager,
) -> usize {
    let mut unified = 0;
    for index in 0..source.globals.len() {
        let global = &source.globals[index];
        if global.linkage != Linkage::External || global.initializer.is_none() {
            continue;
        }

        if is_first_target {
            copy_type_definitions(&global.ty, source, dispatch);
            let mut authoritative = LirGlobal::new(global.name.clone(), global.ty.clone())
                .constant(global.is_constant);
            authoritative.initializer = global.initializer.clone();
            authoritative.alignment = global.alignment;
            authoritative.section = global.section.clone();
            debug!("{} is defined by the dispatch module", global.name);
            dispatch.add_global(authoritative);
        } else {
            let Some(existing) = dispatch.global(&global.name) else {
                panic!(
                    "global @{} of a later target is missing from the dispatch module",
                    global.name
                );
            };
            let same_layout = compatible(
                &global.ty,
                TypeScope::new(&source.type_definitions),
                &existing.ty,
                TypeScope::new(&dispatch.type_definitions),
            );
            if !same_layout {
                let mut warning = Diagnostic::warning(format!(
                    "Mismatch in size/layout of global variable \"{}\" with different targets. \
                     Globals must not include \"varying\" types or arrays with size based on \
                     the lane count when compiling to targets with differing vector widths.",
                    global.name
                ))
                .with_code("global-layout");
                if let Some(symbol) = symbols.global(&global.name) {
                    warning = warning.with_pos(symbol.pos.clone());
                }
                diagnostics.warning(warning);
            }
        }

        source.globals[index].initializer = None;
        unified += 1;
    }
    unified
}

/// Copies the named type definitions `ty` depends on from `from` into `to`.
pub fn copy_type_definitions(ty: &Ty, from: &LirProgram, to: &mut LirProgram) {
    match ty {
        Ty::Named(name) => {
            if to.type_definition(name).is_some() {
                return;
            }
            let Some(definition) = from.type_definition(name) else {
                return;
            };
            let definition = definition.clone();
            // placeholder first so self-references stop here
            to.add_type_definition(name.clone(), definition.clone());
            copy_type_definitions(&definition, from, to);
        }
        Ty::Ptr(inner) | Ty::Array(inner, _) | Ty::Vector(inner, _) => {
            copy_type_definitions(inner, from, to)
        }
        Ty::Struct { fields, .. } => {
            for field in fields {
                copy_type_definitions(field, from, to);
            }
        }
        Ty::Function {
            return_type,
            param_types,
            ..
        } => {
            copy_type_definitions(return_type, from, to);
            for param in param_types {
                copy_type_definitions(param, from, to);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanec_core::diagnostics::DiagnosticLevel;
    use lanec_core::lir::LirConstant;

    fn module_with(global: LirGlobal) -> LirProgram {
        let mut program = LirProgram::new("m");
        program.add_global(global);
        program
    }

    fn counter() -> LirGlobal {
        LirGlobal::new("counter", Ty::I32).with_initializer(LirConstant::Int(5, Ty::I32))
    }

    #[test]
    fn first_target_definitions_move_to_dispatch() {
        let mut source = module_with(counter());
        source.add_global(
            LirGlobal::new("hidden", Ty::F32)
                .with_initializer(LirConstant::Zero(Ty::F32))
                .with_linkage(Linkage::Internal),
        );
        source.add_global(LirGlobal::new("imported", Ty::I64));
        let mut dispatch = LirProgram::new("dispatch");
        let diagnostics = DiagnosticManager::new();

        let unified = unify_globals(
            &mut source,
            &SymbolTable::default(),
            &mut dispatch,
            true,
            &diagnostics,
        );

        assert_eq!(unified, 1);
        assert!(source.global("counter").unwrap().is_declaration());
        assert!(!source.global("hidden").unwrap().is_declaration());
        assert_eq!(
            dispatch.global("counter").unwrap().initializer,
            Some(LirConstant::Int(5, Ty::I32))
        );
        assert!(dispatch.global("hidden").is_none());
        assert!(dispatch.global("imported").is_none());
        assert_eq!(diagnostics.get_diagnostics().len(), 0);
    }

    #[test]
    fn later_targets_keep_declarations_and_warn_on_layout_changes() {
        let lanes = |width| {
            let ty = Ty::Vector(Box::new(Ty::I32), width);
            LirGlobal::new("lanes", ty.clone()).with_initializer(LirConstant::Zero(ty))
        };
        let mut first = module_with(counter());
        first.add_global(lanes(4));
        let mut dispatch = LirProgram::new("dispatch");
        let diagnostics = DiagnosticManager::new();
        let symbols = SymbolTable::default();
        unify_globals(&mut first, &symbols, &mut dispatch, true, &diagnostics);

        let mut second = module_with(counter());
        second.add_global(lanes(8));
        let unified = unify_globals(&mut second, &symbols, &mut dispatch, false, &diagnostics);

        assert_eq!(unified, 2);
        assert!(second.globals.iter().all(LirGlobal::is_declaration));
        assert_eq!(dispatch.globals.len(), 2);
        assert_eq!(
            dispatch.global("lanes").unwrap().ty,
            Ty::Vector(Box::new(Ty::I32), 4)
        );

        let reported = diagnostics.get_diagnostics();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].level, DiagnosticLevel::Warning);
        assert!(reported[0]
            .message
            .starts_with("Mismatch in size/layout of global variable \"lanes\""));
    }

    #[test]
    #[should_panic(expected = "missing from the dispatch module")]
    fn later_target_globals_must_already_be_unified() {
        let mut source = module_with(counter());
        let mut dispatch = LirProgram::new("dispatch");
        unify_globals(
            &mut source,
            &SymbolTable::default(),
            &mut dispatch,
            false,
            &DiagnosticManager::new(),
        );
    }

    #[test]
    fn named_types_travel_with_their_globals() {
        let node = Ty::Struct {
            fields: vec![Ty::I32, Ty::ptr(Ty::Named("Node".into()))],
            packed: false,
        };
        let mut source = module_with(
            LirGlobal::new("head", Ty::Named("Node".into()))
                .with_initializer(LirConstant::Zero(Ty::Named("Node".into()))),
        );
        source.add_type_definition("Node", node.clone());
        let mut dispatch = LirProgram::new("dispatch");

        unify_globals(
            &mut source,
            &SymbolTable::default(),
            &mut dispatch,
            true,
            &DiagnosticManager::new(),
        );
        assert_eq!(dispatch.type_definition("Node"), Some(&node));
        assert_eq!(dispatch.type_definitions.len(), 1);
    }
}
