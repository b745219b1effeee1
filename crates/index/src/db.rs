//! Typed accessors over the key-value columns.

use std::collections::BTreeMap;
use std::sync::Arc;

use stashd_params::Hash256;
use stashd_primitives::encoding::WireRead;
use stashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::chain::HeaderRecord;
use crate::error::ChainError;
use crate::keys::{BlockKey, TxKey, TxioKey, BLOCK_KEY_LEN};
use crate::ssh::{ScriptHistory, SubHistory, TxIoPair};
use crate::stored::{BareHeader, StoredHeader, StoredTx, StoredTxOut, SyncInfo};
use crate::undo::UndoRecord;

const META_SYNC_INFO_KEY: &[u8] = b"sync_info";
const META_MISSING_BLOCKS_KEY: &[u8] = b"missing_blocks";

pub struct IndexDb<S> {
    store: Arc<S>,
}

impl<S> Clone for IndexDb<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> IndexDb<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.store.write_batch(batch)
    }

    // ---- bare headers -------------------------------------------------

    pub fn put_bare_headers<'a>(
        &self,
        batch: &mut WriteBatch,
        records: impl Iterator<Item = &'a HeaderRecord>,
    ) {
        for record in records {
            let row = BareHeader {
                header: record.header,
                height: record.height,
                dup: record.dup,
            };
            batch.put(Column::Headers, record.hash, row.encode());
        }
    }

    pub fn read_all_bare_headers(&self) -> Result<Vec<(Hash256, BareHeader)>, ChainError> {
        let rows = self.store.scan_prefix(Column::Headers, &[])?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let hash: Hash256 = key
                .as_slice()
                .try_into()
                .map_err(|_| ChainError::InvalidKey("header hash"))?;
            out.push((hash, BareHeader::decode(&value)?));
        }
        Ok(out)
    }

    pub fn wipe_headers(&self) -> Result<(), StoreError> {
        self.store.clear_column(Column::Headers)?;
        self.store.clear_column(Column::HeightDup)
    }

    // ---- height -> valid duplicate id ---------------------------------

    pub fn set_valid_dup(&self, batch: &mut WriteBatch, height: u32, dup: u8) {
        batch.put(Column::HeightDup, height.to_be_bytes(), [dup]);
    }

    pub fn valid_dup(&self, height: u32) -> Result<Option<u8>, StoreError> {
        Ok(self
            .store
            .get(Column::HeightDup, &height.to_be_bytes())?
            .and_then(|value| value.first().copied()))
    }

    // ---- stored block rows --------------------------------------------

    pub fn put_stored_header(&self, batch: &mut WriteBatch, row: &StoredHeader) {
        let key = BlockKey::new(row.height, row.dup);
        batch.put(Column::BlockData, *key.as_bytes(), row.encode());
    }

    pub fn stored_header(&self, height: u32, dup: u8) -> Result<Option<StoredHeader>, ChainError> {
        let key = BlockKey::new(height, dup);
        match self.store.get(Column::BlockData, key.as_bytes())? {
            Some(bytes) => Ok(Some(StoredHeader::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn main_stored_header(&self, height: u32) -> Result<Option<StoredHeader>, ChainError> {
        match self.valid_dup(height)? {
            Some(dup) => self.stored_header(height, dup),
            None => Ok(None),
        }
    }

    pub fn put_stored_tx(&self, batch: &mut WriteBatch, key: TxKey, row: &StoredTx) {
        batch.put(Column::Txs, *key.as_bytes(), row.encode());
        // Hint rows are keyed txid ++ tx key so competing blocks at one
        // height each leave their own candidate.
        let mut hint = [0u8; 38];
        hint[..32].copy_from_slice(&row.txid);
        hint[32..].copy_from_slice(key.as_bytes());
        batch.put(Column::TxHints, hint, []);
    }

    pub fn stored_tx(&self, key: TxKey) -> Result<Option<StoredTx>, ChainError> {
        match self.store.get(Column::Txs, key.as_bytes())? {
            Some(bytes) => Ok(Some(StoredTx::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Candidate tx keys for a txid, one per block that carried it.
    pub fn tx_hints(&self, txid: &Hash256) -> Result<Vec<TxKey>, ChainError> {
        let rows = self.store.scan_prefix(Column::TxHints, txid)?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            if key.len() != 38 {
                return Err(ChainError::InvalidKey("tx hint"));
            }
            out.push(TxKey::from_slice(&key[32..]).ok_or(ChainError::InvalidKey("tx hint"))?);
        }
        Ok(out)
    }

    /// The tx key for a txid, preferring the candidate on the valid
    /// duplicate of its height.
    pub fn tx_key_for_hash(&self, txid: &Hash256) -> Result<Option<TxKey>, ChainError> {
        let candidates = self.tx_hints(txid)?;
        let mut fallback = None;
        for candidate in candidates {
            let block = candidate.block_key();
            if self.valid_dup(block.height())? == Some(block.dup()) {
                return Ok(Some(candidate));
            }
            fallback.get_or_insert(candidate);
        }
        Ok(fallback)
    }

    /// All txs of one block, ordered by tx index.
    pub fn block_txs(&self, block: BlockKey) -> Result<Vec<(TxKey, StoredTx)>, ChainError> {
        let rows = self.store.scan_prefix(Column::Txs, block.as_bytes())?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let tx_key = TxKey::from_slice(&key).ok_or(ChainError::InvalidKey("tx key"))?;
            out.push((tx_key, StoredTx::decode(&value)?));
        }
        Ok(out)
    }

    pub fn put_stored_txout(&self, batch: &mut WriteBatch, key: TxioKey, row: &StoredTxOut) {
        batch.put(Column::TxOuts, *key.as_bytes(), row.encode());
    }

    pub fn stored_txout(&self, key: TxioKey) -> Result<Option<StoredTxOut>, ChainError> {
        match self.store.get(Column::TxOuts, key.as_bytes())? {
            Some(bytes) => Ok(Some(StoredTxOut::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ---- script history -----------------------------------------------

    pub fn script_history(&self, script: &[u8]) -> Result<Option<ScriptHistory>, ChainError> {
        match self.store.get(Column::Ssh, script)? {
            Some(bytes) => Ok(Some(ScriptHistory::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_script_history(
        &self,
        batch: &mut WriteBatch,
        script: &[u8],
        totals: &ScriptHistory,
    ) {
        if totals.is_empty() {
            batch.delete(Column::Ssh, script);
        } else {
            batch.put(Column::Ssh, script, totals.encode());
        }
    }

    // Sub-history keys are length-prefixed so a prefix scan over one
    // script can never pick up rows of a longer script that happens to
    // start with the same bytes.
    fn script_prefix(script: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(script.len() + 2);
        key.extend_from_slice(&(script.len() as u16).to_be_bytes());
        key.extend_from_slice(script);
        key
    }

    fn sub_history_key(script: &[u8], block: BlockKey) -> Vec<u8> {
        let mut key = Self::script_prefix(script);
        key.extend_from_slice(block.as_bytes());
        key
    }

    pub fn sub_history(
        &self,
        script: &[u8],
        block: BlockKey,
    ) -> Result<Option<SubHistory>, ChainError> {
        let key = Self::sub_history_key(script, block);
        match self.store.get(Column::SubSsh, &key)? {
            Some(bytes) => Ok(Some(SubHistory::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_sub_history(
        &self,
        batch: &mut WriteBatch,
        script: &[u8],
        block: BlockKey,
        sub: &SubHistory,
    ) {
        let key = Self::sub_history_key(script, block);
        if sub.is_empty() {
            batch.delete(Column::SubSsh, key);
        } else {
            batch.put(Column::SubSsh, key, sub.encode());
        }
    }

    /// Height -> txio count for one script, cheapest form of its history.
    pub fn ssh_summary(&self, script: &[u8]) -> Result<BTreeMap<u32, u32>, ChainError> {
        let mut summary = BTreeMap::new();
        let prefix = Self::script_prefix(script);
        let prefix_len = prefix.len();
        let mut visit = |key: &[u8], value: &[u8]| -> Result<(), StoreError> {
            if key.len() != prefix_len + BLOCK_KEY_LEN {
                return Ok(());
            }
            let Some(block) = BlockKey::from_slice(&key[prefix_len..]) else {
                return Ok(());
            };
            // The pair count is the sub-history's leading CompactSize.
            let mut counted = value;
            if let Ok(count) = counted.take_compact_size() {
                *summary.entry(block.height()).or_insert(0) += count as u32;
            }
            Ok(())
        };
        self.store
            .for_each_prefix(Column::SubSsh, &prefix, &mut visit)?;
        Ok(summary)
    }

    /// Txio pairs for one script over an inclusive height range.
    pub fn txios_for_script_range(
        &self,
        script: &[u8],
        start: u32,
        end: u32,
    ) -> Result<Vec<TxIoPair>, ChainError> {
        let mut out = Vec::new();
        let prefix = Self::script_prefix(script);
        let prefix_len = prefix.len();
        let mut decode_failure = None;
        let mut visit = |key: &[u8], value: &[u8]| -> Result<(), StoreError> {
            if key.len() != prefix_len + BLOCK_KEY_LEN {
                return Ok(());
            }
            let Some(block) = BlockKey::from_slice(&key[prefix_len..]) else {
                return Ok(());
            };
            if block.height() < start || block.height() > end {
                return Ok(());
            }
            match SubHistory::decode(value) {
                Ok(sub) => out.extend(sub.txios.into_values()),
                Err(err) => decode_failure = Some(err),
            }
            Ok(())
        };
        self.store
            .for_each_prefix(Column::SubSsh, &prefix, &mut visit)?;
        if let Some(err) = decode_failure {
            return Err(ChainError::Decode(err));
        }
        Ok(out)
    }

    /// Deletes every history row for each script. Used on unregistration
    /// to reclaim space.
    pub fn wipe_script_history(&self, scripts: &[Vec<u8>]) -> Result<(), ChainError> {
        let mut batch = WriteBatch::new();
        for script in scripts {
            batch.delete(Column::Ssh, script.as_slice());
            let prefix = Self::script_prefix(script);
            for (key, _) in self.store.scan_prefix(Column::SubSsh, &prefix)? {
                batch.delete(Column::SubSsh, key);
            }
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// Drops all script-history rows, forcing the next sync to rescan.
    pub fn delete_histories(&self) -> Result<(), StoreError> {
        self.store.clear_column(Column::Ssh)?;
        self.store.clear_column(Column::SubSsh)
    }

    // ---- undo records -------------------------------------------------

    pub fn put_undo_record(&self, batch: &mut WriteBatch, record: &UndoRecord) {
        let key = BlockKey::new(record.height, record.dup);
        batch.put(Column::Undo, *key.as_bytes(), record.encode());
    }

    pub fn undo_record(&self, height: u32, dup: u8) -> Result<Option<UndoRecord>, ChainError> {
        let key = BlockKey::new(height, dup);
        match self.store.get(Column::Undo, key.as_bytes())? {
            Some(bytes) => Ok(Some(UndoRecord::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_undo_record(&self, batch: &mut WriteBatch, height: u32, dup: u8) {
        let key = BlockKey::new(height, dup);
        batch.delete(Column::Undo, *key.as_bytes());
    }

    // ---- sync cursors -------------------------------------------------

    pub fn sync_info(&self) -> Result<SyncInfo, ChainError> {
        match self.store.get(Column::Meta, META_SYNC_INFO_KEY)? {
            Some(bytes) => Ok(SyncInfo::decode(&bytes)?),
            None => Ok(SyncInfo::default()),
        }
    }

    pub fn put_sync_info(&self, batch: &mut WriteBatch, info: &SyncInfo) {
        batch.put(Column::Meta, META_SYNC_INFO_KEY, info.encode());
    }

    // ---- missing blocks -----------------------------------------------

    pub fn missing_blocks(&self) -> Result<Vec<Hash256>, ChainError> {
        let Some(bytes) = self.store.get(Column::Meta, META_MISSING_BLOCKS_KEY)? else {
            return Ok(Vec::new());
        };
        if bytes.len() % 32 != 0 {
            return Err(ChainError::InvalidKey("missing block list"));
        }
        Ok(bytes
            .chunks_exact(32)
            .map(|chunk| {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }

    pub fn record_missing_block(&self, hash: &Hash256) -> Result<(), ChainError> {
        let mut list = self.missing_blocks()?;
        if list.contains(hash) {
            return Ok(());
        }
        list.push(*hash);
        let mut bytes = Vec::with_capacity(list.len() * 32);
        for entry in &list {
            bytes.extend_from_slice(entry);
        }
        self.store
            .put(Column::Meta, META_MISSING_BLOCKS_KEY, &bytes)?;
        Ok(())
    }

    pub fn clear_missing_blocks(&self) -> Result<(), StoreError> {
        self.store.delete(Column::Meta, META_MISSING_BLOCKS_KEY)
    }

    // ---- wipes --------------------------------------------------------

    /// Destroys every table. Rebuild-from-scratch entry point.
    pub fn wipe_all(&self) -> Result<(), StoreError> {
        for column in Column::ALL {
            self.store.clear_column(column)?;
        }
        Ok(())
    }
}
