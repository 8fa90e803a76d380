use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::byte_iter::ByteIter;
use crate::error::*;
use crate::leb128::{safe_read_leb128, safe_read_sleb128};

pub const MAGIC_HEADER: &[u8; 4] = b"\0asm";
pub const BINARY_VERSION: u32 = 1;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValType {
    I32 = 0x7f,
    I64 = 0x7e,
    F32 = 0x7d,
    F64 = 0x7c,
    V128 = 0x7b,
    FuncRef = 0x70,
    ExternRef = 0x6f,
}

impl ValType {
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x7f => Some(ValType::I32),
            0x7e => Some(ValType::I64),
            0x7d => Some(ValType::F32),
            0x7c => Some(ValType::F64),
            0x7b => Some(ValType::V128),
            0x70 => Some(ValType::FuncRef),
            0x6f => Some(ValType::ExternRef),
            _ => None,
        }
    }

    pub fn read(it: &mut ByteIter) -> Result<Self, Error> {
        Self::from_byte(it.read_u8()?).ok_or(Error::Malformed(INVALID_VALUE_TYPE))
    }

    #[inline]
    pub fn is_ref(self) -> bool { matches!(self, ValType::FuncRef | ValType::ExternRef) }

    #[inline]
    pub fn ref_type(self) -> Option<RefType> {
        match self {
            ValType::FuncRef => Some(RefType::FuncRef),
            ValType::ExternRef => Some(RefType::ExternRef),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::V128 => "v128",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        }
    }
}

impl Display for ValType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RefType {
    FuncRef = 0x70,
    ExternRef = 0x6f,
}

impl RefType {
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x70 => Some(RefType::FuncRef),
            0x6f => Some(RefType::ExternRef),
            _ => None,
        }
    }

    /// Same byte codes as the binary format.
    #[inline]
    pub fn from_u32(code: u32) -> Option<Self> { u8::try_from(code).ok().and_then(Self::from_byte) }

    pub fn read(it: &mut ByteIter) -> Result<Self, Error> {
        Self::from_byte(it.read_u8()?).ok_or(Error::Malformed(MALFORMED_REF_TYPE))
    }
}

impl From<RefType> for ValType {
    fn from(r: RefType) -> Self {
        match r {
            RefType::FuncRef => ValType::FuncRef,
            RefType::ExternRef => ValType::ExternRef,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: impl Into<Vec<ValType>>, results: impl Into<Vec<ValType>>) -> Self {
        Self { params: params.into(), results: results.into() }
    }
}

impl Display for FuncType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let join = |tys: &[ValType]| tys.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ");
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    pub fn read(it: &mut ByteIter) -> Result<Self, Error> {
        let flags: u32 = safe_read_leb128(it.bytes, &mut it.idx, 1)?;
        let min = it.read_u32()?;
        let max = if flags == 1 { Some(it.read_u32()?) } else { None };
        Ok(Self { min, max })
    }

    /// Import subtyping: `self` (the provided entity) fits where `expected` is declared.
    pub fn fits(&self, expected: &Limits) -> bool {
        if self.min < expected.min { return false; }
        match (self.max, expected.max) {
            (_, None) => true,
            (Some(have), Some(want)) => have <= want,
            (None, Some(_)) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub elem: RefType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub ty: ValType,
    pub mutable: bool,
}

impl GlobalType {
    pub fn read(it: &mut ByteIter) -> Result<Self, Error> {
        let ty = ValType::read(it)?;
        let mutable = match it.read_u8()? {
            0x00 => false,
            0x01 => true,
            _ => return malformed(INVALID_MUTABILITY),
        };
        Ok(Self { ty, mutable })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValType),
    Index(u32),
}

impl BlockType {
    pub fn read(bytes: &[u8], pc: &mut usize) -> Result<Self, Error> {
        const EMPTY_TYPE: u8 = 0x40;
        let byte = *bytes.get(*pc).ok_or(Error::Malformed(UNEXPECTED_END))?;
        if byte == EMPTY_TYPE {
            *pc += 1;
            return Ok(BlockType::Empty);
        }
        if let Some(vt) = ValType::from_byte(byte) {
            *pc += 1;
            return Ok(BlockType::Value(vt));
        }
        let n: i64 = safe_read_sleb128(bytes, pc, 33)?;
        if n < 0 { return malformed(INVALID_VALUE_TYPE); }
        Ok(BlockType::Index(n as u32))
    }
}
