use std::ffi::c_void;

use crate::types::{RefType, ValType};

/// Untagged 128-bit operand carrier.
///
/// Numbers live in the low bits, `v128` uses the whole width. A non-null
/// reference sets bit 64 and keeps its payload in the low 64 bits, so the
/// all-zero pattern is the null reference of either reference type. Which
/// accessor is meaningful is decided by the surrounding type context.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct RawValue(pub u128);

const REF_PRESENT: u128 = 1 << 64;

impl RawValue {
    #[inline] pub fn from_i32(v: i32) -> Self { Self(v as u32 as u128) }
    #[inline] pub fn as_i32(self) -> i32 { self.0 as u32 as i32 }
    #[inline] pub fn from_u32(v: u32) -> Self { Self(v as u128) }
    #[inline] pub fn as_u32(self) -> u32 { self.0 as u32 }
    #[inline] pub fn from_i64(v: i64) -> Self { Self(v as u64 as u128) }
    #[inline] pub fn as_i64(self) -> i64 { self.0 as u64 as i64 }
    #[inline] pub fn from_u64(v: u64) -> Self { Self(v as u128) }
    #[inline] pub fn as_u64(self) -> u64 { self.0 as u64 }
    #[inline] pub fn from_f32_bits(bits: u32) -> Self { Self(bits as u128) }
    #[inline] pub fn as_f32_bits(self) -> u32 { self.0 as u32 }
    #[inline] pub fn from_f64_bits(bits: u64) -> Self { Self(bits as u128) }
    #[inline] pub fn as_f64_bits(self) -> u64 { self.0 as u64 }
    #[inline] pub fn from_f32(v: f32) -> Self { Self::from_f32_bits(v.to_bits()) }
    #[inline] pub fn as_f32(self) -> f32 { f32::from_bits(self.as_f32_bits()) }
    #[inline] pub fn from_f64(v: f64) -> Self { Self::from_f64_bits(v.to_bits()) }
    #[inline] pub fn as_f64(self) -> f64 { f64::from_bits(self.as_f64_bits()) }
    #[inline] pub fn from_v128(v: i128) -> Self { Self(v as u128) }
    #[inline] pub fn as_v128(self) -> i128 { self.0 as i128 }
    #[inline] pub fn from_u128(v: u128) -> Self { Self(v) }
    #[inline] pub fn as_u128(self) -> u128 { self.0 }

    #[inline] pub fn null_ref() -> Self { Self(0) }
    #[inline] pub fn from_func_ref(addr: u32) -> Self { Self(REF_PRESENT | addr as u128) }
    #[inline] pub fn from_extern_ref(r: ExternRef) -> Self { Self(REF_PRESENT | r.0 as u128) }
    #[inline] pub fn is_null_ref(self) -> bool { self.0 & REF_PRESENT == 0 }
    #[inline] pub fn as_func_idx(self) -> u32 { self.0 as u32 }
    #[inline] pub fn as_extern_ref(self) -> ExternRef { ExternRef(self.0 as u64) }
}

/// Opaque embedder handle carried by `externref` values.
///
/// The VM never dereferences it; the pointed-to memory belongs to the embedder.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ExternRef(u64);

impl ExternRef {
    #[inline] pub fn from_id(id: u64) -> Self { Self(id) }
    #[inline] pub fn id(self) -> u64 { self.0 }
    #[inline] pub fn from_ptr(ptr: *const c_void) -> Self { Self(ptr as usize as u64) }
    #[inline] pub fn as_ptr(self) -> *mut c_void { self.0 as usize as *mut c_void }
}

/// Typed operand used by the Rust embedding API.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    V128(i128),
    /// Address of a function in the store.
    FuncRef(u32),
    ExternRef(ExternRef),
    NullRef(RefType),
}

impl Value {
    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
            Value::V128(_) => ValType::V128,
            Value::FuncRef(_) => ValType::FuncRef,
            Value::ExternRef(_) => ValType::ExternRef,
            Value::NullRef(r) => (*r).into(),
        }
    }

    /// Drops the type tag.
    pub fn to_raw(self) -> RawValue {
        match self {
            Value::I32(v) => RawValue::from_i32(v),
            Value::I64(v) => RawValue::from_i64(v),
            Value::F32(v) => RawValue::from_f32(v),
            Value::F64(v) => RawValue::from_f64(v),
            Value::V128(v) => RawValue::from_v128(v),
            Value::FuncRef(addr) => RawValue::from_func_ref(addr),
            Value::ExternRef(r) => RawValue::from_extern_ref(r),
            Value::NullRef(_) => RawValue::null_ref(),
        }
    }

    /// Reattaches a type tag. `ty` must be the type the raw value was encoded with.
    pub fn from_raw(raw: RawValue, ty: ValType) -> Self {
        match ty {
            ValType::I32 => Value::I32(raw.as_i32()),
            ValType::I64 => Value::I64(raw.as_i64()),
            ValType::F32 => Value::F32(raw.as_f32()),
            ValType::F64 => Value::F64(raw.as_f64()),
            ValType::V128 => Value::V128(raw.as_v128()),
            ValType::FuncRef if raw.is_null_ref() => Value::NullRef(RefType::FuncRef),
            ValType::FuncRef => Value::FuncRef(raw.as_func_idx()),
            ValType::ExternRef if raw.is_null_ref() => Value::NullRef(RefType::ExternRef),
            ValType::ExternRef => Value::ExternRef(raw.as_extern_ref()),
        }
    }

    pub fn as_i32(&self) -> Option<i32> { if let Value::I32(v) = self { Some(*v) } else { None } }
    pub fn as_i64(&self) -> Option<i64> { if let Value::I64(v) = self { Some(*v) } else { None } }
    pub fn as_f32(&self) -> Option<f32> { if let Value::F32(v) = self { Some(*v) } else { None } }
    pub fn as_f64(&self) -> Option<f64> { if let Value::F64(v) = self { Some(*v) } else { None } }
}

impl From<i32> for Value { fn from(v: i32) -> Self { Value::I32(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::I64(v) } }
impl From<f32> for Value { fn from(v: f32) -> Self { Value::F32(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::F64(v) } }
impl From<ExternRef> for Value { fn from(r: ExternRef) -> Self { Value::ExternRef(r) } }
