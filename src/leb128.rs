use crate::error::*;

/// Reads an unsigned LEB128 integer of at most `bits` bits, rejecting
/// overlong encodings and set padding bits.
#[inline]
pub fn safe_read_leb128<T>(bytes: &[u8], pc: &mut usize, bits: u8) -> Result<T, Error>
where T: TryFrom<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut end = *pc;
    loop {
        let byte = *bytes.get(end).ok_or(Error::Malformed(UNEXPECTED_END))?;
        end += 1;
        if shift < 64 {
            result |= ((byte & 0x7f) as u64) << shift;
        }
        if byte & 0x80 == 0 { break; }
        shift += 7;
        if end - *pc >= (bits as usize).div_ceil(7) {
            return Err(Error::Malformed(INT_TOO_LONG));
        }
    }
    let consumed = end - *pc;
    let used = (consumed - 1) * 7;
    if used < bits as usize {
        let rem = bits as usize - used;
        if rem < 8 && (bytes[end - 1] as u32) >> rem != 0 {
            return Err(Error::Malformed(INT_TOO_LARGE));
        }
    }
    *pc = end;
    T::try_from(result).map_err(|_| Error::Malformed(INT_TOO_LARGE))
}

/// Signed counterpart of [`safe_read_leb128`]; `bits` is 32, 33 or 64.
#[inline]
pub fn safe_read_sleb128<T>(bytes: &[u8], pc: &mut usize, bits: u8) -> Result<T, Error>
where T: TryFrom<i64> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let mut end = *pc;
    let mut byte: u8;
    loop {
        byte = *bytes.get(end).ok_or(Error::Malformed(UNEXPECTED_END))?;
        end += 1;
        if shift < 64 {
            result |= ((byte & 0x7f) as i64) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 { break; }
        if end - *pc >= (bits as usize).div_ceil(7) {
            return Err(Error::Malformed(INT_TOO_LONG));
        }
    }
    let consumed = end - *pc;
    if shift < 64 && (byte & 0x40) != 0 {
        result |= (!0i64) << shift;
    }

    // The unused high bits of the final byte must all equal the sign bit.
    let used = (consumed - 1) * 7;
    if used + 7 > bits as usize {
        let significant = bits as usize - used;
        let mask = (0x7fu8 >> significant) << significant;
        let sign_set = byte & (1 << (significant - 1)) != 0;
        let padding = byte & mask & 0x7f;
        if (sign_set && padding != mask & 0x7f) || (!sign_set && padding != 0) {
            return Err(Error::Malformed(INT_TOO_LARGE));
        }
    }
    *pc = end;
    T::try_from(result).map_err(|_| Error::Malformed(INT_TOO_LARGE))
}

/// Decoder for code that already passed validation. Encodings are known to be
/// well formed, so only the bounds are checked.
#[inline(always)]
pub fn read_leb128<T>(bytes: &[u8], pc: &mut usize) -> Result<T, Error>
where T: TryFrom<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *bytes.get(*pc).ok_or(Error::Malformed(UNEXPECTED_END))?;
        *pc += 1;
        if shift < 64 {
            result |= ((byte & 0x7f) as u64) << shift;
        }
        if byte & 0x80 == 0 {
            return T::try_from(result).map_err(|_| Error::Malformed(INT_TOO_LARGE));
        }
        shift += 7;
    }
}

#[inline(always)]
pub fn read_sleb128<T>(bytes: &[u8], pc: &mut usize) -> Result<T, Error>
where T: TryFrom<i64> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let mut byte: u8;
    loop {
        byte = *bytes.get(*pc).ok_or(Error::Malformed(UNEXPECTED_END))?;
        *pc += 1;
        if shift < 64 {
            result |= ((byte & 0x7f) as i64) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 { break; }
    }
    if shift < 64 && (byte & 0x40) != 0 {
        result |= (!0i64) << shift;
    }
    T::try_from(result).map_err(|_| Error::Malformed(INT_TOO_LARGE))
}
