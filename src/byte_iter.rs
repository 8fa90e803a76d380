use crate::error::*;
use crate::leb128::{safe_read_leb128, safe_read_sleb128};

#[derive(Clone, Copy)]
pub struct ByteIter<'a> {
    pub bytes: &'a [u8],
    pub idx: usize,
}

impl<'a> ByteIter<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8], idx: usize) -> Self { Self { bytes, idx } }
    #[inline]
    pub fn empty(&self) -> bool { self.idx >= self.bytes.len() }
    #[inline]
    pub fn has_n_left(&self, n: usize) -> bool { self.idx.saturating_add(n) <= self.bytes.len() }
    #[inline]
    pub fn cur(&self) -> usize { self.idx }
    #[inline]
    pub fn advance(&mut self, n: usize) { self.idx += n; }
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let b = self.peek_u8()?;
        self.idx += 1;
        Ok(b)
    }
    #[inline]
    pub fn peek_u8(&self) -> Result<u8, Error> {
        self.bytes.get(self.idx).copied().ok_or(Error::Malformed(UNEXPECTED_END))
    }
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, Error> { safe_read_leb128(self.bytes, &mut self.idx, 32) }
    #[inline]
    pub fn read_i32(&mut self) -> Result<i32, Error> { safe_read_sleb128(self.bytes, &mut self.idx, 32) }
    #[inline]
    pub fn read_i64(&mut self) -> Result<i64, Error> { safe_read_sleb128(self.bytes, &mut self.idx, 64) }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if !self.has_n_left(len) { return Err(Error::Malformed(UNEXPECTED_END_SHORT)); }
        let start = self.idx;
        self.idx += len;
        Ok(&self.bytes[start..self.idx])
    }

    pub fn read_u32_le(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_u128_le(&mut self) -> Result<u128, Error> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(self.read_bytes(16)?);
        Ok(u128::from_le_bytes(buf))
    }

    /// Length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<String, Error> {
        let len = self.read_u32()? as usize;
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| Error::Malformed(INVALID_UTF8))
    }
}
