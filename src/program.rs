//! Parsed program container and its two immutable pools.
//!
//! [`TypeRegistry`] maps type names to dense indices and byte sizes;
//! [`LiteralDataPool`] owns the byte blobs declared in the `.datas`
//! section. Both are populated by the parser and frozen before execution;
//! the global environment takes ownership of them.

use crate::errors::CvmError;
use crate::inststruct::FunctionInfo;
use crate::vm::datamanage::DataPointer;
use std::collections::HashMap;

/// Dense index identifying a type in the registry.
///
/// Index 0 is the null/invalid type; [`T_POINTER`] is reserved for the
/// machine-word pointer type. Real user types start after the reserved
/// entries and keep their insertion order for the program's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypeIndex(pub u32);

/// Reserved index of the machine-word pointer type.
pub const T_POINTER: TypeIndex = TypeIndex(1);

/// Per-type metadata. Size zero is legal (an opaque marker).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TypeInfo {
    /// Byte size of a value of this type.
    pub size: usize,
}

/// Insertion-ordered bijection between type names and [`TypeIndex`] values.
///
/// Seeded with the null type at index 0 and the `pointer` type at index 1.
/// Append-only during parsing, read-only afterwards.
#[derive(Debug)]
pub struct TypeRegistry {
    names: HashMap<String, TypeIndex>,
    infos: Vec<TypeInfo>,
}

impl TypeRegistry {
    /// Creates a registry holding only the reserved entries.
    pub fn new() -> Self {
        let mut names = HashMap::new();
        names.insert("pointer".to_string(), T_POINTER);
        Self {
            names,
            infos: vec![
                TypeInfo { size: 0 },
                TypeInfo {
                    size: DataPointer::SIZE,
                },
            ],
        }
    }

    /// Registers a new type, returning its index.
    ///
    /// Returns [`CvmError::DuplicateType`] if the name is already taken.
    pub fn insert(&mut self, name: &str, info: TypeInfo) -> Result<TypeIndex, CvmError> {
        if self.names.contains_key(name) {
            return Err(CvmError::DuplicateType);
        }
        let index = TypeIndex(self.infos.len() as u32);
        self.names.insert(name.to_string(), index);
        self.infos.push(info);
        Ok(index)
    }

    /// Looks a type up by name.
    pub fn find(&self, name: &str) -> Option<TypeIndex> {
        self.names.get(name).copied()
    }

    /// Returns the metadata for `index`.
    pub fn at(&self, index: TypeIndex) -> &TypeInfo {
        &self.infos[index.0 as usize]
    }

    /// Returns mutable metadata for `index`. Only used while parsing,
    /// before the registry freezes.
    pub fn at_mut(&mut self, index: TypeIndex) -> &mut TypeInfo {
        &mut self.infos[index.0 as usize]
    }

    /// Byte size of `index`.
    pub fn size_of(&self, index: TypeIndex) -> usize {
        self.at(index).size
    }

    /// Whether `index` names a registered type.
    pub fn contains(&self, index: TypeIndex) -> bool {
        (index.0 as usize) < self.infos.len()
    }

    /// Number of registered types, reserved entries included.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether the registry holds no entries. Never true after
    /// construction; the reserved entries are seeded there.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable store of literal byte blobs addressed by `#index`.
///
/// Blobs are shared handles so compiled instructions can hold them
/// without borrowing from the pool.
#[derive(Debug, Default)]
pub struct LiteralDataPool {
    blobs: HashMap<u32, DataPointer>,
}

impl LiteralDataPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a blob under `index`.
    ///
    /// Returns [`CvmError::DuplicateDataIndex`] if the index is taken.
    pub fn insert(&mut self, index: u32, bytes: Vec<u8>) -> Result<(), CvmError> {
        if self.blobs.contains_key(&index) {
            return Err(CvmError::DuplicateDataIndex);
        }
        self.blobs.insert(index, DataPointer::from_vec(bytes));
        Ok(())
    }

    /// Returns a shared handle to the blob at `index`.
    pub fn get(&self, index: u32) -> Option<DataPointer> {
        self.blobs.get(&index).cloned()
    }

    /// Number of blobs in the pool.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the pool holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// Everything the parser produces for one source file.
#[derive(Debug)]
pub struct Program {
    /// Type name registry, frozen after parse.
    pub types: TypeRegistry,
    /// Literal data section, frozen after parse.
    pub datas: LiteralDataPool,
    /// Function table in instruction-structure form.
    pub functions: HashMap<String, FunctionInfo>,
    /// Entry function name from the `.program` section.
    pub entry: Option<String>,
}
