use crate::error::OOB_TABLE_ACCESS;
use crate::types::{Limits, RefType, TableType};
use crate::value::RawValue;

/// Reference table. Function references hold store addresses, so a table may
/// be shared between instances without any per-instance bookkeeping.
#[derive(Debug)]
pub struct TableInstance {
    elem: RefType,
    elements: Vec<RawValue>,
    maximum: Option<u32>,
}

impl TableInstance {
    pub fn new(ty: &TableType) -> Self {
        Self::with_init(ty, RawValue::null_ref())
    }

    pub fn with_init(ty: &TableType, init: RawValue) -> Self {
        Self { elem: ty.elem, elements: vec![init; ty.limits.min as usize], maximum: ty.limits.max }
    }

    pub fn size(&self) -> u32 { self.elements.len() as u32 }
    pub fn elem_type(&self) -> RefType { self.elem }

    pub fn ty(&self) -> TableType {
        TableType { elem: self.elem, limits: Limits { min: self.size(), max: self.maximum } }
    }

    pub fn grow(&mut self, delta: u32, init: RawValue) -> u32 {
        let old = self.size();
        let cap = self.maximum.unwrap_or(u32::MAX);
        match old.checked_add(delta) {
            Some(new) if new <= cap => {
                self.elements.resize(new as usize, init);
                old
            }
            _ => u32::MAX,
        }
    }

    pub fn get(&self, idx: u32) -> Result<RawValue, &'static str> {
        self.elements.get(idx as usize).copied().ok_or(OOB_TABLE_ACCESS)
    }

    pub fn set(&mut self, idx: u32, value: RawValue) -> Result<(), &'static str> {
        let slot = self.elements.get_mut(idx as usize).ok_or(OOB_TABLE_ACCESS)?;
        *slot = value;
        Ok(())
    }

    pub fn fill(&mut self, idx: u32, value: RawValue, len: u32) -> Result<(), &'static str> {
        let start = idx as usize;
        let dst = self.elements.get_mut(start..start + len as usize).ok_or(OOB_TABLE_ACCESS)?;
        dst.fill(value);
        Ok(())
    }

    /// Writes `values` starting at `idx`; nothing is written when the range is out of bounds.
    pub fn init(&mut self, idx: u32, values: &[RawValue]) -> Result<(), &'static str> {
        let start = idx as usize;
        let dst = self.elements.get_mut(start..start + values.len()).ok_or(OOB_TABLE_ACCESS)?;
        dst.copy_from_slice(values);
        Ok(())
    }

    pub fn slice(&self, idx: u32, len: u32) -> Result<&[RawValue], &'static str> {
        let start = idx as usize;
        self.elements.get(start..start + len as usize).ok_or(OOB_TABLE_ACCESS)
    }

    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), &'static str> {
        let (dst, src, len) = (dst as usize, src as usize, len as usize);
        if src + len > self.elements.len() || dst + len > self.elements.len() { return Err(OOB_TABLE_ACCESS); }
        self.elements.copy_within(src..src + len, dst);
        Ok(())
    }
}
