//! Block header and block types.

use stashd_params::Hash256;

use crate::encoding::{to_bytes, WireDecode, WireEncode, WireError, WireRead, WireWrite};
use crate::hash::sha256d;
use crate::transaction::Transaction;

/// Serialized header size on the wire.
pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash256 {
        sha256d(&to_bytes(self))
    }
}

impl WireEncode for BlockHeader {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.put_i32(self.version);
        out.put_hash(&self.prev_block);
        out.put_hash(&self.merkle_root);
        out.put_u32(self.time);
        out.put_u32(self.bits);
        out.put_u32(self.nonce);
    }
}

impl WireDecode for BlockHeader {
    fn decode_from(input: &mut &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            version: input.take_i32()?,
            prev_block: input.take_hash()?,
            merkle_root: input.take_hash()?,
            time: input.take_u32()?,
            bits: input.take_u32()?,
            nonce: input.take_u32()?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl WireEncode for Block {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.header.encode_into(out);
        out.put_compact_size(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_into(out);
        }
    }
}

impl WireDecode for Block {
    fn decode_from(input: &mut &[u8]) -> Result<Self, WireError> {
        let header = BlockHeader::decode_from(input)?;
        let count = input.take_compact_size()? as usize;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::decode_from(input)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}
