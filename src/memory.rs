use crate::error::OOB_MEMORY_ACCESS;
use crate::module::Module;
use crate::types::{Limits, MemoryType};

macro_rules! impl_access {
    ($type:ty, $size:literal, $load_name:ident, $store_name:ident) => {
        #[inline(always)]
        pub fn $load_name(&self, ptr: u32, offset: u32) -> Result<$type, &'static str> {
            let addr = (ptr as usize).checked_add(offset as usize).ok_or(OOB_MEMORY_ACCESS)?;
            let src = self.data.get(addr..addr.saturating_add($size)).ok_or(OOB_MEMORY_ACCESS)?;
            let mut buf = [0u8; $size];
            buf.copy_from_slice(src);
            Ok(<$type>::from_le_bytes(buf))
        }
        #[inline(always)]
        pub fn $store_name(&mut self, ptr: u32, offset: u32, v: $type) -> Result<(), &'static str> {
            let addr = (ptr as usize).checked_add(offset as usize).ok_or(OOB_MEMORY_ACCESS)?;
            let dst = self.data.get_mut(addr..addr.saturating_add($size)).ok_or(OOB_MEMORY_ACCESS)?;
            dst.copy_from_slice(&v.to_le_bytes());
            Ok(())
        }
    };
}

macro_rules! impl_signed_load {
    ($name:ident, $target:ty, $source:ident) => {
        #[inline(always)]
        pub fn $name(&self, ptr: u32, offset: u32) -> Result<$target, &'static str> {
            Ok(self.$source(ptr, offset)? as $target)
        }
    };
}

/// Linear memory. Pages are 64 KiB; growth is bounded by the declared maximum
/// and by the VM-wide page limit, whichever is lower.
#[derive(Debug)]
pub struct MemoryInstance {
    data: Vec<u8>,
    current: u32,
    maximum: u32,
    declared_max: Option<u32>,
}

impl MemoryInstance {
    pub const PAGE_SIZE: usize = 65536;

    pub fn new(ty: &MemoryType, page_limit: u32) -> Self {
        let initial = ty.limits.min;
        let maximum = ty.limits.max.unwrap_or(Module::MAX_PAGES).min(page_limit).min(Module::MAX_PAGES);
        let data = vec![0; (initial as usize) * Self::PAGE_SIZE];
        Self { data, current: initial, maximum, declared_max: ty.limits.max }
    }

    pub fn size(&self) -> u32 { self.current }
    pub fn max(&self) -> u32 { self.maximum }

    /// Limits as seen by an importing module.
    pub fn ty(&self) -> MemoryType {
        MemoryType { limits: Limits { min: self.current, max: self.declared_max } }
    }

    /// Returns the previous size in pages, or `u32::MAX` when the request
    /// cannot be satisfied.
    pub fn grow(&mut self, delta: u32) -> u32 {
        if delta == 0 { return self.current; }
        if delta > self.maximum.saturating_sub(self.current) { return u32::MAX; }
        let old = self.current;
        self.current += delta;
        self.data.resize((self.current as usize) * Self::PAGE_SIZE, 0);
        old
    }

    impl_access!(u8,   1,  load_u8,   store_u8);    impl_access!(u16, 2, load_u16, store_u16);
    impl_access!(u32,  4,  load_u32,  store_u32);   impl_access!(u64, 8, load_u64, store_u64);
    impl_access!(u128, 16, load_u128, store_u128);
    impl_signed_load!(load_i8,  i8,  load_u8);      impl_signed_load!(load_i16, i16, load_u16);
    impl_signed_load!(load_i32, i32, load_u32);     impl_signed_load!(load_i64, i64, load_u64);

    #[inline(always)]
    pub fn load_f32(&self, ptr: u32, offset: u32) -> Result<f32, &'static str> {
        Ok(f32::from_bits(self.load_u32(ptr, offset)?))
    }
    #[inline(always)]
    pub fn store_f32(&mut self, ptr: u32, offset: u32, v: f32) -> Result<(), &'static str> {
        self.store_u32(ptr, offset, v.to_bits())
    }
    #[inline(always)]
    pub fn load_f64(&self, ptr: u32, offset: u32) -> Result<f64, &'static str> {
        Ok(f64::from_bits(self.load_u64(ptr, offset)?))
    }
    #[inline(always)]
    pub fn store_f64(&mut self, ptr: u32, offset: u32, v: f64) -> Result<(), &'static str> {
        self.store_u64(ptr, offset, v.to_bits())
    }

    pub fn read_bytes(&self, offset: u32, len: u32) -> Result<&[u8], &'static str> {
        let start = offset as usize;
        self.data.get(start..start + len as usize).ok_or(OOB_MEMORY_ACCESS)
    }

    pub fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), &'static str> {
        let start = offset as usize;
        let end = start.checked_add(bytes.len()).ok_or(OOB_MEMORY_ACCESS)?;
        if end > self.data.len() { return Err(OOB_MEMORY_ACCESS); }
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn fill(&mut self, offset: u32, value: u8, len: u32) -> Result<(), &'static str> {
        let start = offset as usize;
        let dst = self.data.get_mut(start..start + len as usize).ok_or(OOB_MEMORY_ACCESS)?;
        dst.fill(value);
        Ok(())
    }

    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), &'static str> {
        let (dst, src, len) = (dst as usize, src as usize, len as usize);
        if src + len > self.data.len() || dst + len > self.data.len() { return Err(OOB_MEMORY_ACCESS); }
        self.data.copy_within(src..src + len, dst);
        Ok(())
    }

    pub fn data(&self) -> &[u8] { &self.data }
}
