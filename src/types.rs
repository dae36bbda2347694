use std::num::NonZeroU32;

/// Value kind of a single parameter or result slot, as encoded in the
/// operation-table ABI.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValKind {
    I32 = 0,
    I64 = 1,
    F32 = 2,
    F64 = 3,
}

impl ValKind {
    /// Decode a raw kind value from the wire. Unknown values are rejected.
    pub fn from_raw(raw: u32) -> Option<ValKind> {
        match raw {
            0 => Some(ValKind::I32),
            1 => Some(ValKind::I64),
            2 => Some(ValKind::F32),
            3 => Some(ValKind::F64),
            _ => None,
        }
    }
}

/// A function signature. Identity is structural: two types with the same
/// parameter and result sequences are the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    params: Vec<ValKind>,
    results: Vec<ValKind>,
}

impl FuncType {
    pub fn new(params: Vec<ValKind>, results: Vec<ValKind>) -> Self {
        Self { params, results }
    }

    pub fn params(&self) -> &[ValKind] {
        &self.params
    }

    pub fn results(&self) -> &[ValKind] {
        &self.results
    }
}

/// 1-based identifier of a registered function type. 0 stays invalid on
/// the wire, which is why this is a `NonZeroU32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeId(NonZeroU32);

impl TypeId {
    fn from_index(index: usize) -> TypeId {
        TypeId(NonZeroU32::MIN.saturating_add(index as u32))
    }

    /// The raw 1-based id handed back to generated code.
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Append-only table of deduplicated function signatures.
///
/// Grows only while the owning `Code` is being initialized; ids are never
/// reused or invalidated while the `Code` is alive.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<FuncType>,
}

impl TypeRegistry {
    /// Register a signature, returning the id of a structurally equal
    /// signature if one exists, or appending a new entry otherwise.
    pub fn register(&mut self, params: &[ValKind], results: &[ValKind]) -> TypeId {
        if let Some(pos) = self
            .types
            .iter()
            .position(|t| t.params() == params && t.results() == results)
        {
            return TypeId::from_index(pos);
        }
        self.types
            .push(FuncType::new(params.to_vec(), results.to_vec()));
        TypeId::from_index(self.types.len() - 1)
    }

    pub fn get(&self, id: TypeId) -> Option<&FuncType> {
        self.types.get(id.get() as usize - 1)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_signatures_share_an_id() {
        let mut reg = TypeRegistry::default();
        let a = reg.register(&[ValKind::I64, ValKind::I64], &[ValKind::I64]);
        let b = reg.register(&[ValKind::I64, ValKind::I64], &[ValKind::I64]);
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(a.get(), 1);
    }

    #[test]
    fn differing_arity_or_kind_gets_a_fresh_id() {
        let mut reg = TypeRegistry::default();
        let a = reg.register(&[ValKind::I64, ValKind::I64], &[ValKind::I64]);
        let b = reg.register(&[ValKind::I64], &[ValKind::I64]);
        let c = reg.register(&[ValKind::I64, ValKind::I32], &[ValKind::I64]);
        let d = reg.register(&[ValKind::I64, ValKind::I64], &[]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn ids_are_one_based_and_resolvable() {
        let mut reg = TypeRegistry::default();
        let a = reg.register(&[], &[ValKind::I32]);
        assert_eq!(a.get(), 1);
        let ty = reg.get(a).unwrap();
        assert!(ty.params().is_empty());
        assert_eq!(ty.results(), &[ValKind::I32]);
    }
}
