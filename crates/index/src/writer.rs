//! The write engine: raw-block ingestion, batched apply/undo of blocks
//! against the script-history index, side scans and reorg execution.

use std::collections::{HashMap, HashSet};

use stashd_log::{log_debug, log_info, log_warn};
use stashd_params::{hash256_to_hex, Hash256};
use stashd_primitives::block::{Block, BlockHeader, HEADER_SIZE};
use stashd_primitives::encoding::{from_bytes, to_bytes, WireError};
use stashd_primitives::transaction::Transaction;
use stashd_storage::{KeyValueStore, WriteBatch};

use crate::chain::{ChainStore, HeaderRecord, ReorganizationState, DUP_UNASSIGNED};
use crate::db::IndexDb;
use crate::error::ChainError;
use crate::filter::AddressFilter;
use crate::keys::{BlockKey, TxKey, TxioKey};
use crate::ssh::{ScriptHistory, SubHistory, TxIoPair};
use crate::stored::{StoredHeader, StoredTx, StoredTxOut};
use crate::undo::{CreatedTxOut, SpentTxOut, UndoRecord};

/// Commit the pending write set once it grows past this size, to cap the
/// store's transaction size on bulk sync.
pub const UPDATE_BYTES_THRESH: usize = 8 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DbMode {
    /// Only scripts in the address filter get history rows.
    Bare,
    /// Every script gets history rows.
    Super,
}

impl DbMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bare" => Some(Self::Bare),
            "super" => Some(Self::Super),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PruneMode {
    None,
}

impl PruneMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

pub struct BlockWriter<S> {
    db: IndexDb<S>,
    mode: DbMode,
}

/// Dirty rows accumulated while applying or undoing, flushed in one batch.
#[derive(Default)]
struct PendingState {
    txouts: HashMap<TxioKey, StoredTxOut>,
    totals: HashMap<Vec<u8>, ScriptHistory>,
    subs: HashMap<(Vec<u8>, BlockKey), SubHistory>,
    approx_bytes: usize,
}

impl PendingState {
    fn note_bytes(&mut self, bytes: usize) {
        self.approx_bytes += bytes;
    }

    fn flush<S: KeyValueStore>(&mut self, db: &IndexDb<S>) -> Result<(), ChainError> {
        let mut batch = WriteBatch::new();
        self.stage(db, &mut batch);
        db.commit(&batch)?;
        self.txouts.clear();
        self.totals.clear();
        self.subs.clear();
        self.approx_bytes = 0;
        Ok(())
    }

    fn stage<S: KeyValueStore>(&self, db: &IndexDb<S>, batch: &mut WriteBatch) {
        for (key, row) in &self.txouts {
            db.put_stored_txout(batch, *key, row);
        }
        for (script, totals) in &self.totals {
            db.put_script_history(batch, script, totals);
        }
        for ((script, block), sub) in &self.subs {
            db.put_sub_history(batch, script, *block, sub);
        }
    }
}

fn pending_txout<'a, S: KeyValueStore>(
    pending: &'a mut PendingState,
    db: &IndexDb<S>,
    key: TxioKey,
) -> Result<Option<&'a mut StoredTxOut>, ChainError> {
    if !pending.txouts.contains_key(&key) {
        match db.stored_txout(key)? {
            Some(row) => {
                pending.note_bytes(row.script.len() + 32);
                pending.txouts.insert(key, row);
            }
            None => return Ok(None),
        }
    }
    Ok(pending.txouts.get_mut(&key))
}

fn pending_totals<'a, S: KeyValueStore>(
    pending: &'a mut PendingState,
    db: &IndexDb<S>,
    script: &[u8],
) -> Result<&'a mut ScriptHistory, ChainError> {
    if !pending.totals.contains_key(script) {
        let totals = db.script_history(script)?.unwrap_or_default();
        pending.note_bytes(script.len() + 24);
        pending.totals.insert(script.to_vec(), totals);
    }
    Ok(pending
        .totals
        .get_mut(script)
        .expect("totals entry just inserted"))
}

fn pending_sub<'a, S: KeyValueStore>(
    pending: &'a mut PendingState,
    db: &IndexDb<S>,
    script: &[u8],
    block: BlockKey,
) -> Result<&'a mut SubHistory, ChainError> {
    let cache_key = (script.to_vec(), block);
    if !pending.subs.contains_key(&cache_key) {
        let sub = db.sub_history(script, block)?.unwrap_or_default();
        pending.note_bytes(script.len() + sub.txios.len() * 26 + 8);
        pending.subs.insert(cache_key.clone(), sub);
    }
    Ok(pending
        .subs
        .get_mut(&cache_key)
        .expect("sub entry just inserted"))
}

impl<S: KeyValueStore> BlockWriter<S> {
    pub fn new(db: IndexDb<S>, mode: DbMode) -> Self {
        Self { db, mode }
    }

    pub fn db(&self) -> &IndexDb<S> {
        &self.db
    }

    pub fn mode(&self) -> DbMode {
        self.mode
    }

    fn is_tracked(&self, tracked: Option<&HashSet<Vec<u8>>>, script: &[u8]) -> bool {
        match self.mode {
            DbMode::Super => true,
            DbMode::Bare => tracked.map(|set| set.contains(script)).unwrap_or(false),
        }
    }

    /// Parses a framed payload into stored rows. The header must already
    /// be known to the chain store and organized (height and dup set).
    /// A block whose body fails to decode still gets its header row; the
    /// hash lands on the missing-blocks list and the error is returned
    /// for the caller to log and skip.
    pub fn add_raw_block(
        &self,
        chain: &ChainStore,
        file_num: u32,
        offset: u64,
        payload: &[u8],
        update_dup: bool,
        batch: &mut WriteBatch,
    ) -> Result<Hash256, ChainError> {
        if payload.len() < HEADER_SIZE {
            return Err(ChainError::Decode(WireError::Short));
        }
        let header: BlockHeader = from_bytes(&payload[..HEADER_SIZE])?;
        let hash = header.hash();
        let record = chain
            .header(&hash)
            .ok_or(ChainError::NotFound("organized header for raw block"))?;
        if record.dup == DUP_UNASSIGNED {
            return Err(ChainError::NotFound("duplicate id for raw block"));
        }

        let block: Block = match from_bytes(payload) {
            Ok(block) => block,
            Err(err) => {
                // Header is fine; keep it and queue the body for re-fetch.
                self.put_header_row(
                    record,
                    file_num,
                    offset,
                    payload.len() as u32,
                    record.num_tx,
                    batch,
                )?;
                self.db.record_missing_block(&hash)?;
                log_warn!(
                    "block {} body undecodable ({err}), queued for re-fetch",
                    hash256_to_hex(&hash)
                );
                return Err(ChainError::BlockTxData(hash));
            }
        };

        self.put_header_row(
            record,
            file_num,
            offset,
            payload.len() as u32,
            block.transactions.len() as u32,
            batch,
        )?;

        for (index, tx) in block.transactions.iter().enumerate() {
            let tx_key = TxKey::new(record.height, record.dup, index as u16);
            let raw = to_bytes(tx);
            let stored = StoredTx {
                txid: tx.txid(),
                num_txout: tx.vout.len() as u32,
                raw,
            };
            self.db.put_stored_tx(batch, tx_key, &stored);
            for (out_index, output) in tx.vout.iter().enumerate() {
                let key = TxioKey::new(tx_key, out_index as u16);
                // Keep an existing spent pointer on idempotent re-adds.
                let spent_by = self
                    .db
                    .stored_txout(key)?
                    .and_then(|existing| existing.spent_by);
                let row = StoredTxOut {
                    value: output.value,
                    script: output.script_pubkey.clone(),
                    is_coinbase: index == 0,
                    main_branch: record.main_branch,
                    spent_by,
                };
                self.db.put_stored_txout(batch, key, &row);
            }
        }

        if update_dup && record.main_branch {
            self.db.set_valid_dup(batch, record.height, record.dup);
        }
        Ok(hash)
    }

    fn put_header_row(
        &self,
        record: &HeaderRecord,
        file_num: u32,
        offset: u64,
        size: u32,
        num_tx: u32,
        batch: &mut WriteBatch,
    ) -> Result<(), ChainError> {
        let applied = self
            .db
            .stored_header(record.height, record.dup)?
            .map(|existing| existing.applied)
            .unwrap_or(false);
        let row = StoredHeader {
            header: record.header,
            height: record.height,
            dup: record.dup,
            num_tx,
            file_num,
            offset,
            size,
            main_branch: record.main_branch,
            applied,
        };
        self.db.put_stored_header(batch, &row);
        Ok(())
    }

    /// Applies one stored block to the index. Returns false when the block
    /// was already applied (reapply is a no-op). Input resolution sees
    /// prior blocks plus earlier txs of the same block, so intra-block
    /// spends work in one direction only.
    pub fn apply_block(
        &self,
        height: u32,
        dup: u8,
        filter: &AddressFilter<S>,
    ) -> Result<bool, ChainError> {
        let mut header = self
            .db
            .stored_header(height, dup)?
            .ok_or(ChainError::NotFound("stored block to apply"))?;
        if header.applied {
            return Ok(false);
        }
        let block_hash = header.hash();
        let this_block = BlockKey::new(height, dup);
        let txs = self.db.block_txs(this_block)?;
        if txs.is_empty() {
            // Header-only row from a block whose body never deserialized.
            return Err(ChainError::BlockTxData(block_hash));
        }

        let tracked = match self.mode {
            DbMode::Super => None,
            DbMode::Bare => Some(filter.tracked()),
        };

        let mut pending = PendingState::default();
        let mut undo = UndoRecord {
            block_hash,
            height,
            dup,
            stxouts_removed: Vec::new(),
            outpoints_added: Vec::new(),
        };

        for (tx_key, stored_tx) in &txs {
            let tx = stored_tx.transaction()?;
            let mut spent_scripts: HashSet<Vec<u8>> = HashSet::new();

            if !tx.is_coinbase() {
                for (in_index, input) in tx.vin.iter().enumerate() {
                    let prev_key = self.resolve_prevout(&pending, &input.prevout)?;
                    let in_key = TxioKey::new(*tx_key, in_index as u16);
                    let (value, script, prev_coinbase) = {
                        let prev = pending_txout(&mut pending, &self.db, prev_key)?
                            .ok_or(ChainError::NotFound("previous output"))?;
                        undo.stxouts_removed.push(SpentTxOut {
                            key: prev_key,
                            txout: StoredTxOut {
                                spent_by: None,
                                ..prev.clone()
                            },
                        });
                        prev.spent_by = Some(in_key);
                        (prev.value, prev.script.clone(), prev.is_coinbase)
                    };
                    pending.note_bytes(40);

                    if self.is_tracked(tracked.as_ref(), &script) {
                        spent_scripts.insert(script.clone());
                        let totals = pending_totals(&mut pending, &self.db, &script)?;
                        totals.balance -= value;
                        let intra_block = prev_key.tx_key().block_key() == this_block;
                        let sub = pending_sub(&mut pending, &self.db, &script, this_block)?;
                        if intra_block {
                            let pair = sub
                                .txios
                                .get_mut(&prev_key)
                                .ok_or(ChainError::Corruption("intra-block txio missing"))?;
                            pair.txin_key = Some(in_key);
                        } else {
                            sub.insert(TxIoPair {
                                txout_key: prev_key,
                                txin_key: Some(in_key),
                                value,
                                is_coinbase: prev_coinbase,
                                from_self: false,
                                main_branch: true,
                            });
                            pending.note_bytes(34);
                            let totals = pending_totals(&mut pending, &self.db, &script)?;
                            totals.txio_count += 1;
                        }
                    }
                }
            }

            for (out_index, output) in tx.vout.iter().enumerate() {
                let key = TxioKey::new(*tx_key, out_index as u16);
                let script = output.script_pubkey.clone();
                undo.outpoints_added.push(CreatedTxOut {
                    key,
                    script: script.clone(),
                    value: output.value,
                });
                if self.is_tracked(tracked.as_ref(), &script) {
                    let totals = pending_totals(&mut pending, &self.db, &script)?;
                    totals.balance += output.value;
                    totals.total_received += output.value.max(0) as u64;
                    totals.txio_count += 1;
                    let from_self = spent_scripts.contains(&script);
                    let sub = pending_sub(&mut pending, &self.db, &script, this_block)?;
                    sub.insert(TxIoPair {
                        txout_key: key,
                        txin_key: None,
                        value: output.value,
                        is_coinbase: tx.is_coinbase(),
                        from_self,
                        main_branch: true,
                    });
                    pending.note_bytes(34);
                }
            }

            if pending.approx_bytes >= UPDATE_BYTES_THRESH {
                pending.flush(&self.db)?;
            }
        }

        let mut batch = WriteBatch::new();
        pending.stage(&self.db, &mut batch);
        header.applied = true;
        self.db.put_stored_header(&mut batch, &header);
        self.db.put_undo_record(&mut batch, &undo);
        let mut info = self.db.sync_info()?;
        if height >= info.applied_to_hgt || info.top_scanned_blk_hash == [0u8; 32] {
            info.applied_to_hgt = height;
            info.top_scanned_blk_hash = block_hash;
        }
        self.db.put_sync_info(&mut batch, &info);
        self.db.commit(&batch)?;
        log_debug!("applied block {height}:{dup} ({} txs)", txs.len());
        Ok(true)
    }

    fn resolve_prevout(
        &self,
        pending: &PendingState,
        prevout: &stashd_primitives::outpoint::OutPoint,
    ) -> Result<TxioKey, ChainError> {
        let candidates = self.db.tx_hints(&prevout.txid)?;
        // Prefer the candidate on the valid duplicate; earlier txs of the
        // block being applied are already in the pending set.
        let mut fallback = None;
        for candidate in &candidates {
            let block = candidate.block_key();
            let key = TxioKey::new(*candidate, prevout.index as u16);
            if pending.txouts.contains_key(&key)
                || self.db.valid_dup(block.height())? == Some(block.dup())
            {
                return Ok(key);
            }
            fallback.get_or_insert(key);
        }
        fallback.ok_or(ChainError::NotFound("previous output"))
    }

    /// Reverses one applied block. Spent outputs are restored and created
    /// outputs lose their history entries; the filter decides which
    /// scripts' SSH rows are touched. A missing row here means the index
    /// is inconsistent, which is fatal.
    pub fn undo_block(
        &self,
        undo: &UndoRecord,
        filter: &AddressFilter<S>,
    ) -> Result<(), ChainError> {
        let mut header = self
            .db
            .stored_header(undo.height, undo.dup)?
            .ok_or(ChainError::Corruption("stored block missing during undo"))?;
        if !header.applied {
            return Ok(());
        }
        let this_block = BlockKey::new(undo.height, undo.dup);
        let tracked = match self.mode {
            DbMode::Super => None,
            DbMode::Bare => Some(filter.tracked()),
        };
        let mut pending = PendingState::default();

        for spent in &undo.stxouts_removed {
            let mut restored = spent.txout.clone();
            restored.spent_by = None;
            pending.note_bytes(restored.script.len() + 40);
            pending.txouts.insert(spent.key, restored);

            let script = spent.txout.script.clone();
            if self.is_tracked(tracked.as_ref(), &script) {
                let totals = pending_totals(&mut pending, &self.db, &script)?;
                totals.balance += spent.txout.value;
                let intra_block = spent.key.tx_key().block_key() == this_block;
                let sub = pending_sub(&mut pending, &self.db, &script, this_block)?;
                if intra_block {
                    let pair = sub
                        .txios
                        .get_mut(&spent.key)
                        .ok_or(ChainError::Corruption("txio pair missing during undo"))?;
                    pair.txin_key = None;
                } else {
                    if sub.txios.remove(&spent.key).is_none() {
                        return Err(ChainError::Corruption("spend pair missing during undo"));
                    }
                    let totals = pending_totals(&mut pending, &self.db, &script)?;
                    totals.txio_count -= 1;
                }
            }
        }

        for created in &undo.outpoints_added {
            if self.is_tracked(tracked.as_ref(), &created.script) {
                let sub = pending_sub(&mut pending, &self.db, &created.script, this_block)?;
                if sub.txios.remove(&created.key).is_none() {
                    return Err(ChainError::Corruption("created pair missing during undo"));
                }
                let totals = pending_totals(&mut pending, &self.db, &created.script)?;
                totals.balance -= created.value;
                totals.total_received -= created.value.max(0) as u64;
                totals.txio_count -= 1;
            }
            if pending.approx_bytes >= UPDATE_BYTES_THRESH {
                pending.flush(&self.db)?;
            }
        }

        let mut batch = WriteBatch::new();
        pending.stage(&self.db, &mut batch);
        header.applied = false;
        self.db.put_stored_header(&mut batch, &header);
        self.db.delete_undo_record(&mut batch, undo.height, undo.dup);
        let mut info = self.db.sync_info()?;
        info.applied_to_hgt = undo.height.saturating_sub(1);
        info.top_scanned_blk_hash = header.header.prev_block;
        self.db.put_sync_info(&mut batch, &info);
        self.db.commit(&batch)?;
        log_debug!("undid block {}:{}", undo.height, undo.dup);
        Ok(())
    }

    /// Applies main-branch blocks over an inclusive height range.
    pub fn apply_block_range(
        &self,
        from: u32,
        to: u32,
        filter: &AddressFilter<S>,
    ) -> Result<u32, ChainError> {
        let mut applied = 0u32;
        for height in from..=to {
            let Some(dup) = self.db.valid_dup(height)? else {
                return Err(ChainError::NotFound("valid duplicate for height"));
            };
            if self.apply_block(height, dup, filter)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Undoes blocks from the stale tip down to the branch point, points
    /// the height map at the new branch, and applies up to the new tip.
    /// Runs on its own thread so it can hold the write path while callers
    /// keep read snapshots open; the caller joins it.
    pub fn execute_reorg(
        &self,
        chain: &ChainStore,
        state: &ReorganizationState,
        filter: &AddressFilter<S>,
    ) -> Result<(), ChainError> {
        std::thread::scope(|scope| {
            scope
                .spawn(|| self.reorg_inner(chain, state, filter))
                .join()
                .expect("reorg thread")
        })
    }

    fn reorg_inner(
        &self,
        chain: &ChainStore,
        state: &ReorganizationState,
        filter: &AddressFilter<S>,
    ) -> Result<(), ChainError> {
        let (Some(prev_top), Some(new_top), Some(branch_point)) =
            (state.prev_top, state.new_top, state.reorg_branch_point)
        else {
            return Err(ChainError::Corruption("reorg state incomplete"));
        };

        let stale_path = chain.path_down_to(&prev_top, &branch_point);
        log_info!(
            "reorg: undoing {} blocks back to {}",
            stale_path.len(),
            hash256_to_hex(&branch_point)
        );
        for hash in &stale_path {
            let record = chain
                .header(hash)
                .ok_or(ChainError::Corruption("stale block missing from graph"))?;
            let stored = self.db.stored_header(record.height, record.dup)?;
            if !stored.map(|row| row.applied).unwrap_or(false) {
                continue;
            }
            let undo = self
                .db
                .undo_record(record.height, record.dup)?
                .ok_or(ChainError::Corruption("undo record missing for reorg"))?;
            self.undo_block(&undo, filter)?;
        }

        let new_path = chain.path_up_from(&branch_point, &new_top);
        let mut batch = WriteBatch::new();
        for hash in &stale_path {
            if let Some(record) = chain.header(hash) {
                if let Some(mut row) = self.db.stored_header(record.height, record.dup)? {
                    row.main_branch = false;
                    self.db.put_stored_header(&mut batch, &row);
                }
            }
        }
        for hash in &new_path {
            let record = chain
                .header(hash)
                .ok_or(ChainError::Corruption("new-branch block missing from graph"))?;
            self.db.set_valid_dup(&mut batch, record.height, record.dup);
            if let Some(mut row) = self.db.stored_header(record.height, record.dup)? {
                row.main_branch = true;
                self.db.put_stored_header(&mut batch, &row);
            }
        }
        self.db.commit(&batch)?;

        for hash in &new_path {
            let record = chain
                .header(hash)
                .ok_or(ChainError::Corruption("new-branch block missing from graph"))?;
            self.apply_block(record.height, record.dup, filter)?;
        }
        Ok(())
    }

    /// Rebuilds history rows for the scripts of an isolated filter over an
    /// applied range. Used by registration side scans; never touches undo
    /// records, applied flags or spent pointers.
    pub fn scan_history_for_scripts(
        &self,
        scan_filter: &AddressFilter<S>,
        from: u32,
        to: u32,
    ) -> Result<(), ChainError> {
        let tracked = scan_filter.tracked();
        if tracked.is_empty() {
            return Ok(());
        }
        let mut pending = PendingState::default();
        for height in from..=to {
            let Some(dup) = self.db.valid_dup(height)? else {
                continue;
            };
            let Some(header) = self.db.stored_header(height, dup)? else {
                continue;
            };
            if !header.applied {
                continue;
            }
            let this_block = BlockKey::new(height, dup);
            for (tx_key, stored_tx) in self.db.block_txs(this_block)? {
                let tx = stored_tx.transaction()?;
                let mut spent_scripts: HashSet<Vec<u8>> = HashSet::new();
                if !tx.is_coinbase() {
                    self.side_scan_inputs(
                        &mut pending,
                        &tracked,
                        &tx,
                        tx_key,
                        this_block,
                        &mut spent_scripts,
                    )?;
                }
                for (out_index, output) in tx.vout.iter().enumerate() {
                    if !tracked.contains(&output.script_pubkey) {
                        continue;
                    }
                    let key = TxioKey::new(tx_key, out_index as u16);
                    let script = &output.script_pubkey;
                    let totals = pending_totals(&mut pending, &self.db, script)?;
                    totals.balance += output.value;
                    totals.total_received += output.value.max(0) as u64;
                    totals.txio_count += 1;
                    let from_self = spent_scripts.contains(script);
                    let sub = pending_sub(&mut pending, &self.db, script, this_block)?;
                    sub.insert(TxIoPair {
                        txout_key: key,
                        txin_key: None,
                        value: output.value,
                        is_coinbase: tx.is_coinbase(),
                        from_self,
                        main_branch: true,
                    });
                    pending.note_bytes(34);
                }
            }
            if pending.approx_bytes >= UPDATE_BYTES_THRESH {
                pending.flush(&self.db)?;
            }
        }
        pending.flush(&self.db)?;
        Ok(())
    }

    fn side_scan_inputs(
        &self,
        pending: &mut PendingState,
        tracked: &HashSet<Vec<u8>>,
        tx: &Transaction,
        tx_key: TxKey,
        this_block: BlockKey,
        spent_scripts: &mut HashSet<Vec<u8>>,
    ) -> Result<(), ChainError> {
        for (in_index, input) in tx.vin.iter().enumerate() {
            let prev_key = self.resolve_prevout(pending, &input.prevout)?;
            let Some(prev) = self.db.stored_txout(prev_key)? else {
                continue;
            };
            if !tracked.contains(&prev.script) {
                continue;
            }
            spent_scripts.insert(prev.script.clone());
            let in_key = TxioKey::new(tx_key, in_index as u16);
            let script = prev.script.clone();
            let totals = pending_totals(pending, &self.db, &script)?;
            totals.balance -= prev.value;
            let intra_block = prev_key.tx_key().block_key() == this_block;
            let sub = pending_sub(pending, &self.db, &script, this_block)?;
            if intra_block {
                if let Some(pair) = sub.txios.get_mut(&prev_key) {
                    pair.txin_key = Some(in_key);
                }
            } else {
                sub.insert(TxIoPair {
                    txout_key: prev_key,
                    txin_key: Some(in_key),
                    value: prev.value,
                    is_coinbase: prev.is_coinbase,
                    from_self: false,
                    main_branch: true,
                });
                pending.note_bytes(34);
                let totals = pending_totals(pending, &self.db, &script)?;
                totals.txio_count += 1;
            }
        }
        Ok(())
    }

    /// Backward exponential-then-linear probe for the first block whose
    /// stored row is not flagged applied. `applied_to_hgt` tracks the same
    /// information; the probe survives partially-applied states where the
    /// cursor may run ahead of the rows.
    pub fn find_first_unapplied(&self) -> Result<u32, ChainError> {
        let info = self.db.sync_info()?;
        let mut check = info.top_blk_hgt as i64;
        let mut step = 0i64;
        let mut iterations = 0u32;
        loop {
            check -= step;
            if check <= 0 {
                check = 0;
                break;
            }
            let applied = self
                .db
                .main_stored_header(check as u32)?
                .map(|row| row.applied)
                .unwrap_or(false);
            if applied {
                break;
            }
            if iterations < 10 {
                step += 1;
            } else {
                step = step * 3 / 2;
            }
            iterations += 1;
        }
        loop {
            let applied = self
                .db
                .main_stored_header(check as u32)?
                .map(|row| row.applied)
                .unwrap_or(false);
            if !applied {
                break;
            }
            check += 1;
        }
        Ok(check as u32)
    }
}
