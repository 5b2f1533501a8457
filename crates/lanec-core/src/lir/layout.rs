use super::{LirType, LirTypeDefinition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub size: u64,
    pub align: u32,
    pub field_offsets: Vec<u64>,
}

/// Size and ABI alignment queries for one module. Named types resolve
/// against the module's type definitions.
#[derive(Debug, Clone, Copy)]
pub struct DataLayout<'a> {
    pointer_bytes: u64,
    types: &'a [LirTypeDefinition],
}

impl<'a> DataLayout<'a> {
    pub fn new(pointer_bits: u32, types: &'a [LirTypeDefinition]) -> Self {
        Self {
            pointer_bytes: u64::from(pointer_bits / 8),
            types,
        }
    }

    fn resolve(&self, name: &str) -> Option<&'a LirType> {
        self.types
            .iter()
            .find(|def| def.name == name)
            .map(|def| &def.ty)
    }

    pub fn size_of(&self, ty: &LirType) -> u64 {
        match ty {
            LirType::I1 | LirType::I8 => 1,
            LirType::I16 => 2,
            LirType::I32 | LirType::F32 => 4,
            LirType::I64 | LirType::F64 => 8,
            LirType::I128 => 16,
            LirType::Ptr(_) | LirType::Function { .. } => self.pointer_bytes,
            LirType::Array(elem, len) => self.size_of(elem) * len,
            LirType::Struct { .. } => self
                .struct_layout(ty)
                .map(|layout| layout.size)
                .unwrap_or(0),
            LirType::Named(name) => self.resolve(name).map(|ty| self.size_of(ty)).unwrap_or(0),
            LirType::Vector(elem, count) => self.size_of(elem) * u64::from(*count),
            LirType::Void => 0,
        }
    }

    pub fn align_of(&self, ty: &LirType) -> u32 {
        match ty {
            LirType::I1 | LirType::I8 => 1,
            LirType::I16 => 2,
            LirType::I32 | LirType::F32 => 4,
            LirType::I64 | LirType::F64 => 8,
            LirType::I128 => 16,
            LirType::Ptr(_) | LirType::Function { .. } => self.pointer_bytes as u32,
            LirType::Array(elem, _) => self.align_of(elem),
            LirType::Struct { .. } => self
                .struct_layout(ty)
                .map(|layout| layout.align)
                .unwrap_or(1),
            LirType::Named(name) => self.resolve(name).map(|ty| self.align_of(ty)).unwrap_or(1),
            // vectors are aligned to their size rounded up to a power of two
            LirType::Vector(..) => (self.size_of(ty).max(1).next_power_of_two()) as u32,
            LirType::Void => 1,
        }
    }

    pub fn struct_layout(&self, ty: &LirType) -> Option<StructLayout> {
        let (fields, packed) = match ty {
            LirType::Struct { fields, packed } => (fields, *packed),
            LirType::Named(name) => return self.resolve(name).and_then(|ty| self.struct_layout(ty)),
            _ => return None,
        };
        if fields.is_empty() {
            return Some(StructLayout {
                size: 0,
                align: 1,
                field_offsets: Vec::new(),
            });
        }

        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut max_align = 1u32;

        for field in fields {
            let field_align = if packed { 1 } else { self.align_of(field) };
            max_align = max_align.max(field_align);
            if !packed && field_align > 1 {
                offset = align_to(offset, u64::from(field_align));
            }
            offsets.push(offset);
            offset = offset.saturating_add(self.size_of(field));
        }

        let align = if packed { 1 } else { max_align.max(1) };
        let size = if packed {
            offset
        } else {
            align_to(offset, u64::from(align))
        };

        Some(StructLayout {
            size,
            align,
            field_offsets: offsets,
        })
    }
}

fn align_to(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    let rem = value % alignment;
    if rem == 0 {
        value
    } else {
        value + (alignment - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::Ty;

    #[test]
    fn struct_fields_are_padded_to_alignment() {
        let ty = Ty::Struct {
            fields: vec![Ty::I8, Ty::I32, Ty::I8],
            packed: false,
        };
        let layout = DataLayout::new(64, &[]).struct_layout(&ty).unwrap();
        assert_eq!(layout.field_offsets, vec![0, 4, 8]);
        assert_eq!(layout.size, 12);
        assert_eq!(layout.align, 4);
    }

    #[test]
    fn pointer_width_follows_arch() {
        let ptr = Ty::ptr(Ty::F32);
        assert_eq!(DataLayout::new(32, &[]).size_of(&ptr), 4);
        assert_eq!(DataLayout::new(64, &[]).size_of(&ptr), 8);
    }

    #[test]
    fn named_types_resolve_through_definitions() {
        let defs = vec![LirTypeDefinition {
            name: "v8_varying_P".into(),
            ty: Ty::Struct {
                fields: vec![Ty::Vector(Box::new(Ty::F32), 8), Ty::I32],
                packed: false,
            },
        }];
        let layout = DataLayout::new(64, &defs);
        let named = Ty::Named("v8_varying_P".into());
        assert_eq!(layout.align_of(&named), 32);
        assert_eq!(layout.size_of(&named), 64);
    }
}
