//! Environment tree and activation state.
//!
//! The global environment roots the tree and owns the frozen type
//! registry and data pool; a local environment represents one function
//! activation and carries its program counter. Parent and temp-sibling
//! links are non-owning: during execution a [`Frame`] holds mutable
//! borrows of every register file the current instruction may reach, and
//! resolves the `%env` / `%penv` / `%tenv` qualifiers against them. The
//! driver owns a local environment for exactly the duration of its
//! activation; dropping it frees its static buffers and releases its
//! dynamic handles.

use crate::errors::CvmError;
use crate::inststruct::EnvQualifier;
use crate::program::{LiteralDataPool, TypeRegistry};
use crate::vm::registers::RegisterFile;
use crate::vm::Function;
use std::rc::Rc;

/// Root of the environment tree.
///
/// Owns the type registry and literal data pool (read-only after parse)
/// plus its own register file of dynamic registers, reachable from a
/// local environment through `%penv` or the `%g` register class.
pub struct GlobalEnvironment {
    types: TypeRegistry,
    datas: LiteralDataPool,
    registers: RegisterFile,
}

impl GlobalEnvironment {
    /// Creates the global environment with `dyvarb_count` dynamic
    /// registers and no static registers.
    pub fn new(types: TypeRegistry, datas: LiteralDataPool, dyvarb_count: usize) -> Self {
        let registers = RegisterFile::new(dyvarb_count, &[], &types);
        Self {
            types,
            datas,
            registers,
        }
    }

    /// The shared type registry.
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// The literal data pool.
    pub fn datas(&self) -> &LiteralDataPool {
        &self.datas
    }

    /// The global register file.
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Splits the environment into the borrows one execution step needs:
    /// the registry stays shared while the register file is written.
    pub(crate) fn split_mut(&mut self) -> (&TypeRegistry, &mut RegisterFile) {
        (&self.types, &mut self.registers)
    }
}

/// Program-counter cursor for one activation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControlFlow {
    pub pc: usize,
}

/// One function activation: a register file sized from the compiled
/// function descriptor, the function itself, and the control-flow cursor.
#[derive(Debug)]
pub struct LocalEnvironment {
    pub registers: RegisterFile,
    pub function: Rc<Function>,
    pub flow: ControlFlow,
}

impl LocalEnvironment {
    /// Creates the activation for `function`, with all dynamic registers
    /// unset and all static buffers zeroed.
    pub fn new(function: Rc<Function>, types: &TypeRegistry) -> Self {
        let registers = RegisterFile::new(function.dyvarb_count, &function.stvarb_types, types);
        Self {
            registers,
            function,
            flow: ControlFlow::default(),
        }
    }
}

/// Mutable view over the register files one instruction may touch.
///
/// `parent` is the enclosing environment's file (the global file for the
/// entry activation); `temp` is the optional temporary sibling. Missing
/// links surface as runtime errors when a qualifier reaches for them.
pub struct Frame<'a> {
    pub types: &'a TypeRegistry,
    pub current: &'a mut RegisterFile,
    pub parent: Option<&'a mut RegisterFile>,
    pub temp: Option<&'a mut RegisterFile>,
}

impl Frame<'_> {
    /// Resolves an environment qualifier to its register file.
    pub fn registers(&mut self, qualifier: EnvQualifier) -> Result<&mut RegisterFile, CvmError> {
        match qualifier {
            EnvQualifier::Current => Ok(&mut *self.current),
            EnvQualifier::Parent => self
                .parent
                .as_deref_mut()
                .ok_or(CvmError::NoParentEnvironment),
            EnvQualifier::Temp => self.temp.as_deref_mut().ok_or(CvmError::NoTempEnvironment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::TypeInfo;

    fn empty_global() -> GlobalEnvironment {
        GlobalEnvironment::new(TypeRegistry::new(), LiteralDataPool::new(), 2)
    }

    #[test]
    fn global_environment_sizes_its_register_file() {
        let global = empty_global();
        assert_eq!(global.registers().dynamic_count(), 2);
        assert_eq!(global.registers().static_count(), 0);
    }

    #[test]
    fn local_environment_layout_follows_the_function() {
        let mut types = TypeRegistry::new();
        let u32_ty = types.insert("u32", TypeInfo { size: 4 }).unwrap();
        let function = Rc::new(Function {
            dyvarb_count: 2,
            stvarb_types: vec![u32_ty],
            instructions: Vec::new(),
        });

        let local = LocalEnvironment::new(function, &types);
        assert_eq!(local.registers.dynamic_count(), 2);
        assert_eq!(local.registers.static_count(), 1);
        assert_eq!(local.flow.pc, 0);
    }

    #[test]
    fn frame_resolves_qualifiers() {
        let types = TypeRegistry::new();
        let mut current = RegisterFile::new(1, &[], &types);
        let mut parent = RegisterFile::new(3, &[], &types);

        let mut frame = Frame {
            types: &types,
            current: &mut current,
            parent: Some(&mut parent),
            temp: None,
        };

        assert_eq!(
            frame.registers(EnvQualifier::Current).unwrap().dynamic_count(),
            1
        );
        assert_eq!(
            frame.registers(EnvQualifier::Parent).unwrap().dynamic_count(),
            3
        );
        assert!(matches!(
            frame.registers(EnvQualifier::Temp),
            Err(CvmError::NoTempEnvironment)
        ));
    }

    #[test]
    fn frame_without_parent_rejects_penv() {
        let types = TypeRegistry::new();
        let mut current = RegisterFile::new(0, &[], &types);
        let mut frame = Frame {
            types: &types,
            current: &mut current,
            parent: None,
            temp: None,
        };
        assert!(matches!(
            frame.registers(EnvQualifier::Parent),
            Err(CvmError::NoParentEnvironment)
        ));
    }
}
