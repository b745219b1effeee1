//! Per-block undo records: everything needed to reverse one applied block.

use stashd_params::Hash256;
use stashd_primitives::encoding::{WireError, WireRead, WireWrite};

use crate::keys::TxioKey;
use crate::stored::StoredTxOut;

/// An output this block consumed, captured in its pre-spend state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentTxOut {
    pub key: TxioKey,
    pub txout: StoredTxOut,
}

/// An output this block created that received a script-history entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedTxOut {
    pub key: TxioKey,
    pub script: Vec<u8>,
    pub value: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UndoRecord {
    pub block_hash: Hash256,
    pub height: u32,
    pub dup: u8,
    pub stxouts_removed: Vec<SpentTxOut>,
    pub outpoints_added: Vec<CreatedTxOut>,
}

const UNDO_RECORD_VERSION: u8 = 1;

impl UndoRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u8(UNDO_RECORD_VERSION);
        out.put_hash(&self.block_hash);
        out.put_u32(self.height);
        out.put_u8(self.dup);
        out.put_compact_size(self.stxouts_removed.len() as u64);
        for spent in &self.stxouts_removed {
            out.put_slice(spent.key.as_bytes());
            out.put_var_bytes(&spent.txout.encode());
        }
        out.put_compact_size(self.outpoints_added.len() as u64);
        for created in &self.outpoints_added {
            out.put_slice(created.key.as_bytes());
            out.put_var_bytes(&created.script);
            out.put_i64(created.value);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut input = bytes;
        let version = input.take_u8()?;
        if version != UNDO_RECORD_VERSION {
            return Err(WireError::BadData("unsupported undo record version"));
        }
        let block_hash = input.take_hash()?;
        let height = input.take_u32()?;
        let dup = input.take_u8()?;
        let spent_count = input.take_compact_size()? as usize;
        let mut stxouts_removed = Vec::with_capacity(spent_count);
        for _ in 0..spent_count {
            let raw = input.take_array::<8>()?;
            let key = TxioKey::from_slice(&raw).ok_or(WireError::BadData("spent key"))?;
            let txout_bytes = input.take_var_bytes()?;
            let txout = StoredTxOut::decode(&txout_bytes)?;
            stxouts_removed.push(SpentTxOut { key, txout });
        }
        let created_count = input.take_compact_size()? as usize;
        let mut outpoints_added = Vec::with_capacity(created_count);
        for _ in 0..created_count {
            let raw = input.take_array::<8>()?;
            let key = TxioKey::from_slice(&raw).ok_or(WireError::BadData("created key"))?;
            let script = input.take_var_bytes()?;
            let value = input.take_i64()?;
            outpoints_added.push(CreatedTxOut { key, script, value });
        }
        if !input.is_empty() {
            return Err(WireError::Trailing);
        }
        Ok(Self {
            block_hash,
            height,
            dup,
            stxouts_removed,
            outpoints_added,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::TxKey;

    #[test]
    fn undo_record_round_trip() {
        let record = UndoRecord {
            block_hash: [7u8; 32],
            height: 55,
            dup: 0,
            stxouts_removed: vec![SpentTxOut {
                key: TxioKey::new(TxKey::new(50, 0, 1), 0),
                txout: StoredTxOut {
                    value: 30,
                    script: vec![0x51],
                    is_coinbase: false,
                    main_branch: true,
                    spent_by: None,
                },
            }],
            outpoints_added: vec![CreatedTxOut {
                key: TxioKey::new(TxKey::new(55, 0, 1), 0),
                script: vec![0x52],
                value: 30,
            }],
        };
        assert_eq!(UndoRecord::decode(&record.encode()).expect("decode"), record);
    }
}
