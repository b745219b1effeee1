//! Transaction outpoint type.

use stashd_params::Hash256;

use crate::encoding::{WireDecode, WireEncode, WireError, WireRead, WireWrite};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            txid: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.txid == [0u8; 32]
    }
}

impl WireEncode for OutPoint {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.put_hash(&self.txid);
        out.put_u32(self.index);
    }
}

impl WireDecode for OutPoint {
    fn decode_from(input: &mut &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            txid: input.take_hash()?,
            index: input.take_u32()?,
        })
    }
}
