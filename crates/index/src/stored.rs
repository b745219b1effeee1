//! Persisted row types for headers, transactions and outputs.

use stashd_params::Hash256;
use stashd_primitives::block::{BlockHeader, HEADER_SIZE};
use stashd_primitives::encoding::{
    from_bytes, WireDecode, WireEncode, WireError, WireRead, WireWrite,
};

use crate::keys::TxioKey;

/// Bare header row in the `Headers` column, keyed by block hash.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BareHeader {
    pub header: BlockHeader,
    pub height: u32,
    pub dup: u8,
}

impl BareHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + 5);
        self.header.encode_into(&mut out);
        out.put_u32(self.height);
        out.put_u8(self.dup);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut input = bytes;
        let row = Self {
            header: BlockHeader::decode_from(&mut input)?,
            height: input.take_u32()?,
            dup: input.take_u8()?,
        };
        if !input.is_empty() {
            return Err(WireError::Trailing);
        }
        Ok(row)
    }
}

/// Full block header row in the `BlockData` column, keyed by block key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredHeader {
    pub header: BlockHeader,
    pub height: u32,
    pub dup: u8,
    pub num_tx: u32,
    pub file_num: u32,
    pub offset: u64,
    pub size: u32,
    pub main_branch: bool,
    pub applied: bool,
}

const STORED_HEADER_FLAG_MAIN: u8 = 1 << 0;
const STORED_HEADER_FLAG_APPLIED: u8 = 1 << 1;

impl StoredHeader {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + 26);
        self.header.encode_into(&mut out);
        out.put_u32(self.height);
        out.put_u8(self.dup);
        out.put_u32(self.num_tx);
        out.put_u32(self.file_num);
        out.put_u64(self.offset);
        out.put_u32(self.size);
        let mut flags = 0u8;
        if self.main_branch {
            flags |= STORED_HEADER_FLAG_MAIN;
        }
        if self.applied {
            flags |= STORED_HEADER_FLAG_APPLIED;
        }
        out.put_u8(flags);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut input = bytes;
        let header = BlockHeader::decode_from(&mut input)?;
        let height = input.take_u32()?;
        let dup = input.take_u8()?;
        let num_tx = input.take_u32()?;
        let file_num = input.take_u32()?;
        let offset = input.take_u64()?;
        let size = input.take_u32()?;
        let flags = input.take_u8()?;
        if !input.is_empty() {
            return Err(WireError::Trailing);
        }
        Ok(Self {
            header,
            height,
            dup,
            num_tx,
            file_num,
            offset,
            size,
            main_branch: flags & STORED_HEADER_FLAG_MAIN != 0,
            applied: flags & STORED_HEADER_FLAG_APPLIED != 0,
        })
    }
}

/// Transaction row in the `Txs` column, keyed by tx key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredTx {
    pub txid: Hash256,
    pub raw: Vec<u8>,
    pub num_txout: u32,
}

impl StoredTx {
    pub fn transaction(
        &self,
    ) -> Result<stashd_primitives::transaction::Transaction, WireError> {
        from_bytes(&self.raw)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.raw.len() + 40);
        out.put_hash(&self.txid);
        out.put_u32(self.num_txout);
        out.put_var_bytes(&self.raw);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut input = bytes;
        let row = Self {
            txid: input.take_hash()?,
            num_txout: input.take_u32()?,
            raw: input.take_var_bytes()?,
        };
        if !input.is_empty() {
            return Err(WireError::Trailing);
        }
        Ok(row)
    }
}

/// Output row in the `TxOuts` column, keyed by txio key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredTxOut {
    pub value: i64,
    pub script: Vec<u8>,
    pub is_coinbase: bool,
    pub main_branch: bool,
    /// Input-side key of the confirmed spender, when spent.
    pub spent_by: Option<TxioKey>,
}

const STORED_TXOUT_FLAG_COINBASE: u8 = 1 << 0;
const STORED_TXOUT_FLAG_MAIN: u8 = 1 << 1;
const STORED_TXOUT_FLAG_SPENT: u8 = 1 << 2;

impl StoredTxOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.script.len() + 20);
        out.put_i64(self.value);
        out.put_var_bytes(&self.script);
        let mut flags = 0u8;
        if self.is_coinbase {
            flags |= STORED_TXOUT_FLAG_COINBASE;
        }
        if self.main_branch {
            flags |= STORED_TXOUT_FLAG_MAIN;
        }
        if self.spent_by.is_some() {
            flags |= STORED_TXOUT_FLAG_SPENT;
        }
        out.put_u8(flags);
        if let Some(spender) = &self.spent_by {
            out.put_slice(spender.as_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut input = bytes;
        let value = input.take_i64()?;
        let script = input.take_var_bytes()?;
        let flags = input.take_u8()?;
        let spent_by = if flags & STORED_TXOUT_FLAG_SPENT != 0 {
            let raw = input.take_array::<8>()?;
            Some(TxioKey::from_slice(&raw).ok_or(WireError::BadData("spender key"))?)
        } else {
            None
        };
        if !input.is_empty() {
            return Err(WireError::Trailing);
        }
        Ok(Self {
            value,
            script,
            is_coinbase: flags & STORED_TXOUT_FLAG_COINBASE != 0,
            main_branch: flags & STORED_TXOUT_FLAG_MAIN != 0,
            spent_by,
        })
    }
}

/// Sync cursors, one row in the `Meta` column.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncInfo {
    pub top_blk_hash: Hash256,
    pub top_blk_hgt: u32,
    pub applied_to_hgt: u32,
    pub top_scanned_blk_hash: Hash256,
}

impl SyncInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(72);
        out.put_hash(&self.top_blk_hash);
        out.put_u32(self.top_blk_hgt);
        out.put_u32(self.applied_to_hgt);
        out.put_hash(&self.top_scanned_blk_hash);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut input = bytes;
        let row = Self {
            top_blk_hash: input.take_hash()?,
            top_blk_hgt: input.take_u32()?,
            applied_to_hgt: input.take_u32()?,
            top_scanned_blk_hash: input.take_hash()?,
        };
        if !input.is_empty() {
            return Err(WireError::Trailing);
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::TxKey;

    fn header() -> BlockHeader {
        BlockHeader {
            version: 2,
            prev_block: [1u8; 32],
            merkle_root: [2u8; 32],
            time: 1_650_000_000,
            bits: 0x207f_ffff,
            nonce: 9,
        }
    }

    #[test]
    fn stored_header_round_trip() {
        let row = StoredHeader {
            header: header(),
            height: 1234,
            dup: 1,
            num_tx: 7,
            file_num: 2,
            offset: 8192,
            size: 4096,
            main_branch: true,
            applied: false,
        };
        let decoded = StoredHeader::decode(&row.encode()).expect("decode");
        assert_eq!(decoded, row);
    }

    #[test]
    fn stored_txout_round_trip_with_spender() {
        let spender = TxioKey::new(TxKey::new(500, 0, 2), 1);
        let row = StoredTxOut {
            value: 12_345,
            script: vec![0x76, 0xa9],
            is_coinbase: false,
            main_branch: true,
            spent_by: Some(spender),
        };
        let decoded = StoredTxOut::decode(&row.encode()).expect("decode");
        assert_eq!(decoded, row);

        let unspent = StoredTxOut {
            spent_by: None,
            ..row
        };
        let decoded = StoredTxOut::decode(&unspent.encode()).expect("decode");
        assert_eq!(decoded.spent_by, None);
    }

    #[test]
    fn sync_info_round_trip() {
        let info = SyncInfo {
            top_blk_hash: [3u8; 32],
            top_blk_hgt: 100,
            applied_to_hgt: 99,
            top_scanned_blk_hash: [4u8; 32],
        };
        assert_eq!(SyncInfo::decode(&info.encode()).expect("decode"), info);
    }
}
