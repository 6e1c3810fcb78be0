//! Register file for one environment.
//!
//! Two register kinds coexist: dynamic registers (`dyvarb`) whose buffer
//! and type change instruction-to-instruction, and static registers
//! (`stvarb`) whose type is fixed at function-definition time over a
//! pre-sized, zero-initialised buffer. Each file also carries the
//! environment's `%res` result register, itself dynamic.

use crate::errors::CvmError;
use crate::program::{TypeIndex, TypeRegistry};
use crate::vm::datamanage::DataPointer;

/// Dynamically-typed register: `{ data, type }`, both mutable at runtime.
///
/// Starts as `{None, TypeIndex(0)}`. When `data` is set, the allocation
/// is at least `sizeof(type)` bytes.
#[derive(Clone, Debug, Default)]
pub struct DynamicRegister {
    pub data: Option<DataPointer>,
    pub ty: TypeIndex,
}

/// Statically-typed register: declared type, uniquely-owned buffer of
/// exactly `sizeof(type)` bytes for the life of the environment.
#[derive(Debug)]
pub struct StaticRegister {
    pub data: Box<[u8]>,
    ty: TypeIndex,
}

impl StaticRegister {
    /// The type fixed at function-definition time.
    pub fn ty(&self) -> TypeIndex {
        self.ty
    }
}

/// One environment's registers.
#[derive(Debug)]
pub struct RegisterFile {
    dynamic: Vec<DynamicRegister>,
    statics: Vec<StaticRegister>,
    result: DynamicRegister,
}

impl RegisterFile {
    /// Builds a file from a function descriptor: `dyvarb_count` unset
    /// dynamic registers and one zeroed static register per declared type.
    pub fn new(dyvarb_count: usize, stvarb_types: &[TypeIndex], types: &TypeRegistry) -> Self {
        let statics = stvarb_types
            .iter()
            .map(|&ty| StaticRegister {
                data: vec![0u8; types.size_of(ty)].into_boxed_slice(),
                ty,
            })
            .collect();
        Self {
            dynamic: vec![DynamicRegister::default(); dyvarb_count],
            statics,
            result: DynamicRegister::default(),
        }
    }

    /// Returns the dynamic register at `index`.
    pub fn get_dynamic(&self, index: u16) -> Result<&DynamicRegister, CvmError> {
        self.dynamic
            .get(index as usize)
            .ok_or(CvmError::InvalidRegisterIndex {
                index,
                available: self.dynamic.len(),
            })
    }

    /// Returns the dynamic register at `index`, mutably.
    pub fn get_dynamic_mut(&mut self, index: u16) -> Result<&mut DynamicRegister, CvmError> {
        let available = self.dynamic.len();
        self.dynamic
            .get_mut(index as usize)
            .ok_or(CvmError::InvalidRegisterIndex { index, available })
    }

    /// Returns the static register at `index`.
    pub fn get_static(&self, index: u16) -> Result<&StaticRegister, CvmError> {
        self.statics
            .get(index as usize)
            .ok_or(CvmError::InvalidRegisterIndex {
                index,
                available: self.statics.len(),
            })
    }

    /// Returns the static register at `index`, mutably.
    pub fn get_static_mut(&mut self, index: u16) -> Result<&mut StaticRegister, CvmError> {
        let available = self.statics.len();
        self.statics
            .get_mut(index as usize)
            .ok_or(CvmError::InvalidRegisterIndex { index, available })
    }

    /// The `%res` register.
    pub fn result(&self) -> &DynamicRegister {
        &self.result
    }

    /// The `%res` register, mutably.
    pub fn result_mut(&mut self) -> &mut DynamicRegister {
        &mut self.result
    }

    /// All dynamic registers in index order, as dumped by `db_opreg`.
    pub fn dynamics(&self) -> &[DynamicRegister] {
        &self.dynamic
    }

    /// Number of dynamic registers.
    pub fn dynamic_count(&self) -> usize {
        self.dynamic.len()
    }

    /// Number of static registers.
    pub fn static_count(&self) -> usize {
        self.statics.len()
    }
}
