//! Wire serialization.
//!
//! Writing is an extension trait over `Vec<u8>`; reading is an extension
//! trait over byte slices that consumes from the front, so a decoder is
//! just `let mut input: &[u8] = ...` and the leftover slice is the
//! unparsed remainder. CompactSize values must be minimally encoded and
//! are capped at [`MAX_COMPACT_SIZE`].

use stashd_params::Hash256;

/// Upper bound for any CompactSize on this wire (32 MiB), shared with
/// the framing layer's sanity checks.
pub const MAX_COMPACT_SIZE: u64 = 0x0200_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before the field did.
    Short,
    /// A CompactSize was not minimally encoded.
    NonCanonical,
    /// A CompactSize exceeded [`MAX_COMPACT_SIZE`].
    Oversize,
    BadData(&'static str),
    /// Bytes remained after a complete decode.
    Trailing,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Short => write!(f, "input ended early"),
            WireError::NonCanonical => write!(f, "compact size not minimally encoded"),
            WireError::Oversize => write!(f, "compact size over limit"),
            WireError::BadData(what) => write!(f, "{what}"),
            WireError::Trailing => write!(f, "unconsumed trailing bytes"),
        }
    }
}

impl std::error::Error for WireError {}

/// Little-endian append operations on a byte buffer.
pub trait WireWrite {
    fn put_u8(&mut self, value: u8);
    fn put_u16(&mut self, value: u16);
    fn put_u32(&mut self, value: u32);
    fn put_i32(&mut self, value: i32);
    fn put_u64(&mut self, value: u64);
    fn put_i64(&mut self, value: i64);
    fn put_slice(&mut self, bytes: &[u8]);
    fn put_hash(&mut self, hash: &Hash256);
    fn put_compact_size(&mut self, value: u64);
    fn put_var_bytes(&mut self, bytes: &[u8]);
}

impl WireWrite for Vec<u8> {
    fn put_u8(&mut self, value: u8) {
        self.push(value);
    }

    fn put_u16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i32(&mut self, value: i32) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_slice(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    fn put_hash(&mut self, hash: &Hash256) {
        self.extend_from_slice(hash);
    }

    fn put_compact_size(&mut self, value: u64) {
        match value {
            0..=0xfc => self.push(value as u8),
            0xfd..=0xffff => {
                self.push(0xfd);
                self.extend_from_slice(&(value as u16).to_le_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.push(0xfe);
                self.extend_from_slice(&(value as u32).to_le_bytes());
            }
            _ => {
                self.push(0xff);
                self.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    fn put_var_bytes(&mut self, bytes: &[u8]) {
        self.put_compact_size(bytes.len() as u64);
        self.extend_from_slice(bytes);
    }
}

/// Front-consuming reads over a byte slice. Each call advances the
/// slice past what it parsed.
pub trait WireRead {
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError>;
    fn take_bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError>;
    fn take_compact_size(&mut self) -> Result<u64, WireError>;

    fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take_array::<1>()?[0])
    }

    fn take_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    fn take_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    fn take_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    fn take_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    fn take_i64(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    fn take_hash(&mut self) -> Result<Hash256, WireError> {
        self.take_array::<32>()
    }

    fn take_var_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.take_compact_size()?;
        self.take_bytes(len as usize)
    }
}

impl WireRead for &[u8] {
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        if self.len() < N {
            return Err(WireError::Short);
        }
        let (head, tail) = self.split_at(N);
        *self = tail;
        Ok(head.try_into().expect("split length"))
    }

    fn take_bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError> {
        if self.len() < len {
            return Err(WireError::Short);
        }
        let (head, tail) = self.split_at(len);
        *self = tail;
        Ok(head.to_vec())
    }

    fn take_compact_size(&mut self) -> Result<u64, WireError> {
        let tag = self.take_u8()?;
        // Each wider form has a floor below which the shorter form was
        // the canonical choice.
        let (value, floor) = match tag {
            0xfd => (self.take_u16()? as u64, 0xfd),
            0xfe => (self.take_u32()? as u64, 0x1_0000),
            0xff => (self.take_u64()?, 0x1_0000_0000),
            small => (small as u64, 0),
        };
        if value < floor {
            return Err(WireError::NonCanonical);
        }
        if value > MAX_COMPACT_SIZE {
            return Err(WireError::Oversize);
        }
        Ok(value)
    }
}

pub trait WireEncode {
    fn encode_into(&self, out: &mut Vec<u8>);
}

pub trait WireDecode: Sized {
    fn decode_from(input: &mut &[u8]) -> Result<Self, WireError>;
}

pub fn to_bytes<T: WireEncode>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode_into(&mut out);
    out
}

/// Decodes a whole buffer; leftover bytes are an error.
pub fn from_bytes<T: WireDecode>(bytes: &[u8]) -> Result<T, WireError> {
    let mut input = bytes;
    let value = T::decode_from(&mut input)?;
    if !input.is_empty() {
        return Err(WireError::Trailing);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_size_round_trips_at_width_boundaries() {
        for value in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0x01ff_ffff] {
            let mut buf = Vec::new();
            buf.put_compact_size(value);
            let mut input = buf.as_slice();
            assert_eq!(input.take_compact_size().expect("compact size"), value);
            assert!(input.is_empty());
        }
    }

    #[test]
    fn compact_size_rejects_wider_than_needed() {
        // 0x10 forced into the 0xfd form.
        let mut input: &[u8] = &[0xfd, 0x10, 0x00];
        assert_eq!(input.take_compact_size(), Err(WireError::NonCanonical));
    }

    #[test]
    fn compact_size_rejects_over_limit() {
        let mut buf = Vec::new();
        buf.put_compact_size(MAX_COMPACT_SIZE + 1);
        let mut input = buf.as_slice();
        assert_eq!(input.take_compact_size(), Err(WireError::Oversize));
    }

    #[test]
    fn reads_advance_the_slice() {
        let mut buf = Vec::new();
        buf.put_u16(0x0201);
        buf.put_u32(7);
        buf.put_var_bytes(b"ab");
        let mut input = buf.as_slice();
        assert_eq!(input.take_u16().expect("u16"), 0x0201);
        assert_eq!(input.take_u32().expect("u32"), 7);
        assert_eq!(input.take_var_bytes().expect("bytes"), b"ab");
        assert!(input.is_empty());
    }

    #[test]
    fn short_input_reports_short() {
        let mut input: &[u8] = &[0x01, 0x02];
        assert_eq!(input.take_u32(), Err(WireError::Short));
        // A failed read leaves the slice untouched.
        assert_eq!(input.len(), 2);
    }
}
