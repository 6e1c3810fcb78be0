//! Size-aware data-movement primitives.
//!
//! Every opcode that touches register data funnels through the operations
//! here: [`move_register`] implements the copy-versus-reassign split
//! between static and dynamic destinations, [`load_data`] publishes
//! literal bytes under a declared type, and [`load_data_pointer`] stores
//! the address of a fresh copy instead of the bytes themselves.
//!
//! Ownership discipline: dynamic register buffers are shared, immutable
//! handles ([`DataPointer`]); `mov` between dynamic registers aliases the
//! buffer and replacing a slot drops the previous handle. Static register
//! buffers are uniquely owned by their register and written in place.

use crate::errors::CvmError;
use crate::program::{TypeIndex, TypeRegistry, T_POINTER};
use crate::vm::registers::DynamicRegister;
use std::rc::Rc;

/// Shared handle to an immutable heap buffer.
///
/// The byte size of the region a register holds is tracked by the
/// register's type, not the handle; the handle's own length is the
/// allocation size and is at least the type size.
#[derive(Clone, Debug)]
pub struct DataPointer(Rc<[u8]>);

impl DataPointer {
    /// Machine-word size: the width of a stored pointer value.
    pub const SIZE: usize = std::mem::size_of::<usize>();

    /// Takes ownership of `bytes` as a shared buffer.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    /// Copies `bytes` into a fresh shared buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(Rc::from(bytes))
    }

    /// The buffer contents.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Allocation size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the allocation is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether two handles share one allocation.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

/// Destination adapter uniform across opcodes.
pub enum DstData<'a> {
    /// The zero register: writes are discarded.
    Null,
    /// A dynamic slot: both its handle and its type are replaced.
    Dynamic { slot: &'a mut DynamicRegister },
    /// A static slot's buffer: bytes are copied in, the type is fixed.
    Static { buffer: &'a mut [u8] },
}

/// Source snapshot read from a register.
///
/// A dynamic source supplies its own current type; a static source
/// supplies its declared type. The zero register reads as null data and
/// the null type.
pub struct SrcData {
    pub data: Option<DataPointer>,
    pub ty: TypeIndex,
}

impl SrcData {
    /// The zero register's value.
    pub fn null() -> Self {
        Self {
            data: None,
            ty: TypeIndex(0),
        }
    }
}

/// Moves a register value into a destination.
///
/// Dynamic destinations take the source handle and type by reference
/// (no byte copy); static destinations receive a byte copy of
/// `sizeof(src.ty)` bytes, clamped to the destination buffer.
pub fn move_register(
    types: &TypeRegistry,
    dst: DstData<'_>,
    src: SrcData,
) -> Result<(), CvmError> {
    match dst {
        DstData::Null => Ok(()),
        DstData::Dynamic { slot } => {
            slot.data = src.data;
            slot.ty = src.ty;
            Ok(())
        }
        DstData::Static { buffer } => {
            let size = types.size_of(src.ty);
            if size == 0 {
                return Ok(());
            }
            let data = src.data.ok_or(CvmError::MalformedInstruction {
                reason: "null source for sized copy",
            })?;
            let count = size.min(buffer.len()).min(data.len());
            buffer[..count].copy_from_slice(&data.bytes()[..count]);
            Ok(())
        }
    }
}

/// Loads literal bytes into a destination under a declared type.
///
/// Dynamic destinations receive a fresh zeroed buffer of
/// `sizeof(dst_ty)` bytes with `min(sizeof(dst_ty), src.len())` bytes
/// copied in, and take `dst_ty` as their type. Static destinations are
/// cleared and overwritten in place; the caller must pass the slot's
/// declared type.
pub fn load_data(
    types: &TypeRegistry,
    dst: DstData<'_>,
    src: &[u8],
    dst_ty: TypeIndex,
) -> Result<(), CvmError> {
    let size = types.size_of(dst_ty);
    match dst {
        DstData::Null => Ok(()),
        DstData::Dynamic { slot } => {
            let mut buffer = vec![0u8; size];
            let count = size.min(src.len());
            buffer[..count].copy_from_slice(&src[..count]);
            slot.data = Some(DataPointer::from_vec(buffer));
            slot.ty = dst_ty;
            Ok(())
        }
        DstData::Static { buffer } => {
            let cleared = size.min(buffer.len());
            buffer[..cleared].fill(0);
            let count = cleared.min(src.len());
            buffer[..count].copy_from_slice(&src[..count]);
            Ok(())
        }
    }
}

/// Loads the *address* of a fresh copy of `src` into a destination.
///
/// The copy's allocation is leaked: its address escapes into VM-visible
/// data and must stay valid for the rest of the run. Dynamic destinations
/// become [`T_POINTER`]-typed machine words.
pub fn load_data_pointer(dst: DstData<'_>, src: &[u8]) -> Result<(), CvmError> {
    if matches!(dst, DstData::Null) {
        return Ok(());
    }
    let copy: Box<[u8]> = src.into();
    let address = Box::leak(copy).as_ptr() as usize;
    let word = address.to_ne_bytes();
    match dst {
        DstData::Null => Ok(()),
        DstData::Dynamic { slot } => {
            slot.data = Some(DataPointer::from_slice(&word));
            slot.ty = T_POINTER;
            Ok(())
        }
        DstData::Static { buffer } => {
            let count = DataPointer::SIZE.min(buffer.len());
            buffer[..count].copy_from_slice(&word[..count]);
            Ok(())
        }
    }
}

/// Uppercase hex image of a byte slice.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out
}

/// `db_opreg` line for one dynamic register: the first `sizeof(type)`
/// bytes of its buffer as hex, or nothing when the register is unset.
pub fn format_register(types: &TypeRegistry, reg: &DynamicRegister) -> String {
    let hex = match &reg.data {
        Some(data) => {
            let size = types.size_of(reg.ty).min(data.len());
            to_hex(&data.bytes()[..size])
        }
        None => String::new(),
    };
    format!("[data: {}]", hex)
}
