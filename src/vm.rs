//! Virtual machine: runtime compilation and execution.
//!
//! The second stage of the pipeline. [`compile_function`] lowers a parsed
//! [`FunctionInfo`] to a [`Function`] of runtime instructions whose
//! operands are bound to direct handles: symbolic register names become
//! `(kind, slot, environment)` triples, data-section references become
//! shared blob handles, and type indices are validated against the frozen
//! registry. [`VirtualMachine`] then drives a local environment through
//! the compiled instruction list.
//!
//! Runtime instructions are a tagged enum dispatched inline by the
//! execution loop; each one reports a [`ControlAction`] that moves the
//! program counter.

pub mod datamanage;
pub mod environment;
pub mod registers;


use crate::errors::CvmError;
use crate::inststruct::{EnvQualifier, FunctionInfo, Instruction, Register, RegisterClass};
use crate::program::{LiteralDataPool, Program, TypeIndex, TypeRegistry};
use crate::vm::datamanage::{
    format_register, load_data, move_register, DataPointer, DstData, SrcData,
};
use crate::vm::environment::{Frame, GlobalEnvironment, LocalEnvironment};
use std::collections::HashMap;
use std::rc::Rc;

/// Compile-time-resolved register reference.
///
/// The dynamic/static routing of unqualified `%N` names happens during
/// compilation against the enclosing function's layout; the runtime only
/// ever sees which vector to index in which environment's file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RegRef {
    /// Reads as null, writes are discarded.
    Zero,
    /// The current environment's result register.
    Result,
    Dynamic { index: u16, env: EnvQualifier },
    Static { index: u16, env: EnvQualifier },
}

/// One compiled instruction with fully resolved operands.
///
/// Immediate and data-section loads unify here: the compiler materialises
/// an immediate as its little-endian byte image, so at runtime both are a
/// blob handle loaded under a declared type.
#[derive(Clone, Debug)]
pub(crate) enum RuntimeInst {
    Move {
        dst: RegRef,
        src: RegRef,
    },
    Load {
        dst: RegRef,
        src: DataPointer,
        ty: TypeIndex,
    },
    Return,
    DebugOutputRegisters,
}

/// Verdict of one executed instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlAction {
    /// Step to the next instruction.
    Advance,
    /// Set the program counter to an absolute target. Reserved; no
    /// current opcode emits it.
    #[allow(dead_code)]
    Jump(usize),
    /// Exit the current local environment.
    Return,
}

/// A runtime-compiled function: the register layout the activation is
/// built from, plus its instruction list.
#[derive(Debug)]
pub struct Function {
    pub dyvarb_count: usize,
    pub stvarb_types: Vec<TypeIndex>,
    pub(crate) instructions: Vec<RuntimeInst>,
}

/// Lowers a parsed function to its runtime form.
///
/// Every register reference is resolved and bounds-checked against the
/// function's own layout where the layout is known at compile time
/// (class-`n` registers); class-`g` and class-`t` references stay
/// symbolic-by-environment and are bounds-checked at runtime against the
/// file they reach.
pub(crate) fn compile_function(
    info: &FunctionInfo,
    types: &TypeRegistry,
    datas: &LiteralDataPool,
) -> Result<Function, CvmError> {
    let mut instructions = Vec::with_capacity(info.instructions.len());

    for inst in &info.instructions {
        let compiled = match inst {
            Instruction::Move { dst, src } => RuntimeInst::Move {
                dst: resolve_register(*dst, info)?,
                src: resolve_register(*src, info)?,
            },
            Instruction::LoadImm { dst, imm, ty } => {
                check_type(types, *ty)?;
                RuntimeInst::Load {
                    dst: resolve_register(*dst, info)?,
                    src: DataPointer::from_slice(&imm.to_le_bytes()),
                    ty: *ty,
                }
            }
            Instruction::LoadData { dst, index, ty } => {
                check_type(types, *ty)?;
                let src = datas
                    .get(index.0)
                    .ok_or(CvmError::UndefinedData { index: index.0 })?;
                RuntimeInst::Load {
                    dst: resolve_register(*dst, info)?,
                    src,
                    ty: *ty,
                }
            }
            Instruction::Return => RuntimeInst::Return,
            Instruction::DebugOutputRegisters => RuntimeInst::DebugOutputRegisters,
        };
        instructions.push(compiled);
    }

    Ok(Function {
        dyvarb_count: info.dyvarb_count,
        stvarb_types: info.stvarb_typelist.clone(),
        instructions,
    })
}

fn check_type(types: &TypeRegistry, ty: TypeIndex) -> Result<(), CvmError> {
    if types.contains(ty) {
        Ok(())
    } else {
        Err(CvmError::UndefinedTypeIndex { index: ty.0 })
    }
}

/// Register numbering is 1-based: class-`n` indices `1..=D` name the
/// dynamic slots, higher indices the static slots at `index - D - 1`.
/// A qualified index 0 resolves to the first dynamic slot (only the bare
/// `%0` token is the zero register).
fn resolve_register(reg: Register, info: &FunctionInfo) -> Result<RegRef, CvmError> {
    let dynamic = info.dyvarb_count;
    let statics = info.stvarb_typelist.len();

    match reg {
        Register::Zero => Ok(RegRef::Zero),
        Register::Result => Ok(RegRef::Result),
        Register::Indexed {
            class: RegisterClass::Global,
            index,
            ..
        } => Ok(RegRef::Dynamic {
            index: index.saturating_sub(1),
            env: EnvQualifier::Parent,
        }),
        Register::Indexed {
            class: RegisterClass::Temp,
            index,
            ..
        } => Ok(RegRef::Dynamic {
            index: index.saturating_sub(1),
            env: EnvQualifier::Temp,
        }),
        Register::Indexed {
            class: RegisterClass::Numeric,
            env,
            index,
        } => {
            let n = index as usize;
            if n <= dynamic {
                let slot = n.saturating_sub(1);
                if slot >= dynamic {
                    return Err(CvmError::RegisterOutOfRange {
                        index,
                        dynamic,
                        statics,
                    });
                }
                Ok(RegRef::Dynamic {
                    index: slot as u16,
                    env,
                })
            } else {
                let slot = n - dynamic - 1;
                if slot >= statics {
                    return Err(CvmError::RegisterOutOfRange {
                        index,
                        dynamic,
                        statics,
                    });
                }
                Ok(RegRef::Static {
                    index: slot as u16,
                    env,
                })
            }
        }
    }
}

/// The machine itself: the global environment plus the parsed function
/// table, executing one control flow per invocation.
pub struct VirtualMachine {
    global: GlobalEnvironment,
    functions: HashMap<String, FunctionInfo>,
    entry: Option<String>,
}

impl VirtualMachine {
    /// Creates a machine over `program` with an empty global register file.
    pub fn new(program: Program) -> Self {
        Self::with_globals(program, 0)
    }

    /// Creates a machine whose global environment holds `global_dyvarbs`
    /// dynamic registers (reachable via `%g` and `%penv`).
    pub fn with_globals(program: Program, global_dyvarbs: usize) -> Self {
        let Program {
            types,
            datas,
            functions,
            entry,
        } = program;
        Self {
            global: GlobalEnvironment::new(types, datas, global_dyvarbs),
            functions,
            entry,
        }
    }

    /// The entry function named by the `.program` section, if any.
    pub fn entry_name(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// The global environment.
    pub fn global(&self) -> &GlobalEnvironment {
        &self.global
    }

    /// Compiles the named function against the frozen registry and pool.
    pub fn compile(&self, name: &str) -> Result<Rc<Function>, CvmError> {
        let info = self
            .functions
            .get(name)
            .ok_or_else(|| CvmError::UndefinedFunction {
                name: name.to_string(),
            })?;
        Ok(Rc::new(compile_function(
            info,
            self.global.types(),
            self.global.datas(),
        )?))
    }

    /// Runs `function` in a fresh local environment to completion.
    ///
    /// The environment is created on entry and torn down on exit, which
    /// frees its static buffers and releases its dynamic handles.
    pub fn execute(&mut self, function: Rc<Function>) -> Result<(), CvmError> {
        let mut local = LocalEnvironment::new(function, self.global.types());
        self.execute_local(&mut local)
    }

    /// Compiles and runs the entry function.
    pub fn run(&mut self) -> Result<(), CvmError> {
        let name = self.entry.clone().unwrap_or_default();
        let function = self.compile(&name)?;
        self.execute(function)
    }

    /// The fetch/execute loop over one activation.
    ///
    /// Executing past the last instruction without `ret` is equivalent to
    /// returning. Instruction failure is fatal and propagates out.
    fn execute_local(&mut self, local: &mut LocalEnvironment) -> Result<(), CvmError> {
        let function = Rc::clone(&local.function);
        loop {
            let inst = match function.instructions.get(local.flow.pc) {
                Some(inst) => inst,
                None => return Ok(()),
            };

            let (types, global_registers) = self.global.split_mut();
            let mut frame = Frame {
                types,
                current: &mut local.registers,
                parent: Some(global_registers),
                temp: None,
            };

            match exec(&mut frame, inst)? {
                ControlAction::Advance => local.flow.pc += 1,
                ControlAction::Jump(target) => local.flow.pc = target,
                ControlAction::Return => return Ok(()),
            }
        }
    }
}

/// Executes a single instruction against the frame.
fn exec(frame: &mut Frame<'_>, inst: &RuntimeInst) -> Result<ControlAction, CvmError> {
    match inst {
        RuntimeInst::Move { dst, src } => {
            let src = read_src(frame, *src)?;
            let types = frame.types;
            with_dst(frame, *dst, |dst| move_register(types, dst, src))?;
            Ok(ControlAction::Advance)
        }
        RuntimeInst::Load { dst, src, ty } => {
            let types = frame.types;
            with_dst(frame, *dst, |dst| {
                load_data(types, dst, src.bytes(), *ty)
            })?;
            Ok(ControlAction::Advance)
        }
        RuntimeInst::Return => Ok(ControlAction::Return),
        RuntimeInst::DebugOutputRegisters => {
            for reg in frame.current.dynamics() {
                println!("{}", format_register(frame.types, reg));
            }
            Ok(ControlAction::Advance)
        }
    }
}

/// Snapshots a register as a [`SrcData`].
///
/// A dynamic source shares its handle; a static source publishes a copy
/// of its buffer under its declared type, so a later write to the static
/// register cannot reach through an aliasing dynamic register.
fn read_src(frame: &mut Frame<'_>, reg: RegRef) -> Result<SrcData, CvmError> {
    match reg {
        RegRef::Zero => Ok(SrcData::null()),
        RegRef::Result => {
            let r = frame.current.result();
            Ok(SrcData {
                data: r.data.clone(),
                ty: r.ty,
            })
        }
        RegRef::Dynamic { index, env } => {
            let file = frame.registers(env)?;
            let r = file.get_dynamic(index)?;
            Ok(SrcData {
                data: r.data.clone(),
                ty: r.ty,
            })
        }
        RegRef::Static { index, env } => {
            let file = frame.registers(env)?;
            let r = file.get_static(index)?;
            Ok(SrcData {
                data: Some(DataPointer::from_slice(&r.data)),
                ty: r.ty(),
            })
        }
    }
}

/// Resolves a destination register and hands its [`DstData`] adapter to
/// `f`.
fn with_dst<F>(frame: &mut Frame<'_>, reg: RegRef, f: F) -> Result<(), CvmError>
where
    F: FnOnce(DstData<'_>) -> Result<(), CvmError>,
{
    match reg {
        RegRef::Zero => f(DstData::Null),
        RegRef::Result => f(DstData::Dynamic {
            slot: frame.current.result_mut(),
        }),
        RegRef::Dynamic { index, env } => {
            let file = frame.registers(env)?;
            f(DstData::Dynamic {
                slot: file.get_dynamic_mut(index)?,
            })
        }
        RegRef::Static { index, env } => {
            let file = frame.registers(env)?;
            f(DstData::Static {
                buffer: &mut file.get_static_mut(index)?.data,
            })
        }
    }
}
