//! Structural type compatibility across independently compiled modules.
//!
//! Two modules compiled for different vector widths may give the same
//! global different physical types. `compatible` decides whether two types
//! describe the same layout: arrays compare length then element, pointers
//! compare pointees, structs compare packedness and every field, and all
//! other types compare by identity.

use super::{LirType, LirTypeDefinition};
use std::collections::HashSet;

/// Type context for one side of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct TypeScope<'a> {
    definitions: &'a [LirTypeDefinition],
}

impl<'a> TypeScope<'a> {
    pub fn new(definitions: &'a [LirTypeDefinition]) -> Self {
        Self { definitions }
    }

    fn resolve(&self, name: &str) -> Option<&'a LirType> {
        self.definitions
            .iter()
            .find(|def| def.name == name)
            .map(|def| &def.ty)
    }
}

pub fn compatible(lhs: &LirType, lhs_scope: TypeScope<'_>, rhs: &LirType, rhs_scope: TypeScope<'_>) -> bool {
    let mut visited = HashSet::new();
    Compare {
        lhs_scope,
        rhs_scope,
        visited: &mut visited,
    }
    .types(lhs, rhs)
}

struct Compare<'s, 'a, 'b> {
    lhs_scope: TypeScope<'a>,
    rhs_scope: TypeScope<'b>,
    visited: &'s mut HashSet<(String, String)>,
}

impl Compare<'_, '_, '_> {
    fn types(&mut self, lhs: &LirType, rhs: &LirType) -> bool {
        match (lhs, rhs) {
            (LirType::Named(a), LirType::Named(b)) => {
                // a pair already under comparison is assumed equal, which
                // terminates self-referential layouts
                if !self.visited.insert((a.clone(), b.clone())) {
                    return true;
                }
                match (self.lhs_scope.resolve(a), self.rhs_scope.resolve(b)) {
                    (Some(a), Some(b)) => self.types(a, b),
                    (None, None) => a == b,
                    _ => false,
                }
            }
            (LirType::Named(a), other) => match self.lhs_scope.resolve(a) {
                Some(a) => self.types(a, other),
                None => false,
            },
            (other, LirType::Named(b)) => match self.rhs_scope.resolve(b) {
                Some(b) => self.types(other, b),
                None => false,
            },
            (LirType::Array(a, n), LirType::Array(b, m)) => n == m && self.types(a, b),
            (LirType::Ptr(a), LirType::Ptr(b)) => self.types(a, b),
            (
                LirType::Struct {
                    fields: a,
                    packed: pa,
                },
                LirType::Struct {
                    fields: b,
                    packed: pb,
                },
            ) => {
                pa == pb
                    && a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(a, b)| self.types(a, b))
            }
            _ => lhs == rhs,
        }
    }
}
