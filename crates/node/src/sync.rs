//! The block-data engine: file discovery, catch-up sync, tail updates.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use stashd_index::blockfiles::{
    read_new_frames, BlockFileSet, FileCursor, FileReaderError, MappedBlockFile,
};
use stashd_index::chain::{ChainStore, ReorganizationState, DUP_UNASSIGNED};
use stashd_index::db::IndexDb;
use stashd_index::filter::AddressFilter;
use stashd_index::keys::{BlockKey, TxKey};
use stashd_index::stored::SyncInfo;
use stashd_index::writer::{BlockWriter, DbMode, PruneMode, UPDATE_BYTES_THRESH};
use stashd_index::ChainError;
use stashd_log::{log_error, log_info, log_warn};
use stashd_params::{hash256_to_hex, ChainParams, Hash256};
use stashd_primitives::block::{BlockHeader, HEADER_SIZE};
use stashd_primitives::encoding::{from_bytes, WireRead};
use stashd_storage::{KeyValueStore, StoreError, WriteBatch};

#[derive(Debug)]
pub enum EngineError {
    Chain(ChainError),
    File(FileReaderError),
    Store(StoreError),
    Config(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Chain(err) => write!(f, "{err}"),
            EngineError::File(err) => write!(f, "{err}"),
            EngineError::Store(err) => write!(f, "{err}"),
            EngineError::Config(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ChainError> for EngineError {
    fn from(err: ChainError) -> Self {
        EngineError::Chain(err)
    }
}

impl From<FileReaderError> for EngineError {
    fn from(err: FileReaderError) -> Self {
        EngineError::File(err)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Store(err)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    Offline = 0,
    Loading = 1,
    Ready = 2,
}

/// What one tail pass did to the chain, for notification fan-out.
#[derive(Clone, Debug)]
pub struct TailOutcome {
    pub state: ReorganizationState,
    /// txid -> tx key for every tx confirmed by the pass.
    pub confirmed: HashMap<Hash256, TxKey>,
    pub prev_top_height: u32,
}

pub struct Engine<S> {
    pub params: ChainParams,
    pub db: IndexDb<S>,
    pub writer: BlockWriter<S>,
    pub filter: AddressFilter<S>,
    chain: RwLock<ChainStore>,
    files: Mutex<BlockFileSet>,
    tail_cursor: Mutex<FileCursor>,
    state: AtomicU8,
    prune: PruneMode,
}

impl<S: KeyValueStore> Engine<S> {
    pub fn new(
        params: ChainParams,
        store: Arc<S>,
        mode: DbMode,
        prune: PruneMode,
        block_dir: impl Into<PathBuf>,
    ) -> Result<Self, EngineError> {
        let files = BlockFileSet::discover(block_dir, params.magic)?;
        let db = IndexDb::new(store);
        let writer = BlockWriter::new(db.clone(), mode);
        let filter = AddressFilter::new(db.clone());
        let chain = ChainStore::new(params.genesis_hash);
        Ok(Self {
            params,
            db,
            writer,
            filter,
            chain: RwLock::new(chain),
            files: Mutex::new(files),
            tail_cursor: Mutex::new(FileCursor::default()),
            state: AtomicU8::new(RunState::Offline as u8),
            prune,
        })
    }

    pub fn run_state(&self) -> RunState {
        match self.state.load(Ordering::Acquire) {
            2 => RunState::Ready,
            1 => RunState::Loading,
            _ => RunState::Offline,
        }
    }

    pub fn with_chain<R>(&self, f: impl FnOnce(&ChainStore) -> R) -> R {
        let chain = self.chain.read().expect("chain lock");
        f(&chain)
    }

    pub fn top_height(&self) -> u32 {
        self.with_chain(|chain| chain.top_height())
    }

    pub fn header_height(&self, hash: &Hash256) -> Option<u32> {
        self.with_chain(|chain| chain.header(hash).map(|record| record.height))
    }

    pub fn total_block_bytes(&self) -> u64 {
        self.files.lock().expect("file set lock").total_bytes()
    }

    /// Catch-up state machine: discover files, decide rescan/rebuild,
    /// read headers, organize, store raw blocks, undo stale scans, apply.
    pub fn initial_sync(&self, force_rebuild: bool) -> Result<(), EngineError> {
        self.state.store(RunState::Loading as u8, Ordering::Release);

        {
            let mut files = self.files.lock().expect("file set lock");
            files.refresh()?;
            log_info!(
                "{} block files, {} bytes total",
                files.files().len(),
                files.total_bytes()
            );
        }

        let mut info = self.db.sync_info()?;
        if force_rebuild {
            log_info!("rebuild requested, wiping databases");
            self.db.wipe_all()?;
            self.filter.clear();
            info = SyncInfo::default();
        }
        let last_scanned_hash = info.top_scanned_blk_hash;

        self.load_headers()?;

        // Figure out where scanning must resume. A last-scanned block
        // that fell off the main branch gets undone back to the fork.
        let mut scan_from = 0u32;
        if last_scanned_hash != [0u8; 32] {
            let (on_main, height, reorg_state) = self.with_chain(|chain| {
                match chain.header(&last_scanned_hash) {
                    Some(record) if record.main_branch => (true, record.height, None),
                    Some(record) => (
                        false,
                        record.height,
                        chain.find_reorg_point_from_block(&last_scanned_hash),
                    ),
                    None => (false, 0, None),
                }
            });
            if on_main {
                scan_from = height.saturating_add(1);
            } else if let Some(state) = reorg_state {
                scan_from = self.undo_stale_branch(&state)?;
            }
        }

        self.store_raw_blocks()?;

        let top = self.top_height();
        let have_blocks = self.with_chain(|chain| !chain.is_empty());
        if have_blocks {
            let first_unapplied = self.writer.find_first_unapplied()?;
            let mut from = scan_from.min(first_unapplied);
            if let Some(filter_from) = self.filter.scan_from() {
                from = from.min(filter_from);
            }
            log_info!("applying blocks {from}..={top}");
            self.writer.apply_block_range(from, top, &self.filter)?;
        }

        self.state.store(RunState::Ready as u8, Ordering::Release);
        log_info!("sync complete, top height {top}");
        Ok(())
    }

    /// Loads persisted headers, then walks every block file for frames,
    /// organizes the graph and persists the bare headers. Header
    /// corruption nukes the header table and retries from the files.
    fn load_headers(&self) -> Result<(), EngineError> {
        let mut chain = self.chain.write().expect("chain lock");
        chain.clear();
        for (hash, bare) in self.db.read_all_bare_headers()? {
            chain.add_persisted_block(hash, bare.header, bare.dup);
        }
        if !chain.is_empty() {
            if let Err(err) = chain.force_organize() {
                log_error!("persisted headers corrupt ({err}), rebuilding header table");
                self.db.wipe_headers()?;
                chain.clear();
            }
        }

        self.scan_header_files(&mut chain)?;

        if chain.is_empty() {
            log_warn!("no blocks found in block files");
            return Ok(());
        }
        chain.force_organize().map_err(|err| {
            EngineError::Config(format!("block files do not build the configured chain: {err}"))
        })?;

        let mut batch = WriteBatch::new();
        self.db
            .put_bare_headers(&mut batch, chain.iter_headers().filter(|r| r.has_file_location()));
        for height in 0..=chain.top_height() {
            if let Some(hash) = chain.main_chain_hash(height) {
                if let Some(record) = chain.header(&hash) {
                    self.db.set_valid_dup(&mut batch, height, record.dup);
                }
            }
        }
        self.db.commit(&batch)?;
        log_info!(
            "organized {} headers, top height {}",
            chain.len(),
            chain.top_height()
        );
        Ok(())
    }

    fn scan_header_files(&self, chain: &mut ChainStore) -> Result<(), EngineError> {
        let files = self.files.lock().expect("file set lock");
        // Magic check up front: wrong-network files are fatal.
        let _ = files.first_hashes()?;
        let mut end_cursor = FileCursor::default();
        for info in files.files() {
            if info.size == 0 {
                end_cursor = FileCursor {
                    file_num: info.ordinal,
                    offset: 0,
                };
                continue;
            }
            let mapped = MappedBlockFile::open(info)?;
            let mut cursor = mapped.cursor(files.magic(), 0);
            loop {
                match cursor.next_frame() {
                    Some(frame) => {
                        if frame.payload.len() < HEADER_SIZE {
                            if !cursor.resync() {
                                break;
                            }
                            continue;
                        }
                        match from_bytes::<BlockHeader>(&frame.payload[..HEADER_SIZE]) {
                            Ok(header) => {
                                let hash = header.hash();
                                chain.add_block(hash, header);
                                let num_tx = frame_tx_count(frame.payload);
                                chain.set_file_location(
                                    &hash,
                                    info.ordinal,
                                    frame.offset,
                                    frame.payload.len() as u32,
                                    num_tx,
                                );
                            }
                            Err(err) => {
                                log_warn!(
                                    "bad header in file {} at {}: {err}",
                                    info.ordinal,
                                    frame.offset
                                );
                                if !cursor.resync() {
                                    break;
                                }
                            }
                        }
                    }
                    None => {
                        if cursor.at_padding() {
                            break;
                        }
                        if !cursor.resync() {
                            break;
                        }
                    }
                }
            }
            end_cursor = FileCursor {
                file_num: info.ordinal,
                offset: cursor.position(),
            };
        }
        *self.tail_cursor.lock().expect("tail cursor lock") = end_cursor;
        Ok(())
    }

    /// Stores raw rows for every organized block not yet in the block
    /// table. Fork blocks are stored too, so a later reorganization can
    /// apply them without re-reading headers.
    fn store_raw_blocks(&self) -> Result<(), EngineError> {
        let chain = self.chain.read().expect("chain lock");
        if chain.is_empty() {
            return Ok(());
        }
        let mut info = self.db.sync_info()?;

        // On-disk order keeps the mmap walk sequential.
        let mut records: Vec<(u32, u64, u32, u32, u8, Hash256, bool)> = chain
            .iter_headers()
            .filter(|record| record.has_file_location() && record.dup != DUP_UNASSIGNED)
            .map(|record| {
                (
                    record.file_num,
                    record.offset,
                    record.size,
                    record.height,
                    record.dup,
                    record.hash,
                    record.main_branch,
                )
            })
            .collect();
        records.sort();

        let files = self.files.lock().expect("file set lock");
        let mut mapped: Option<MappedBlockFile> = None;
        let mut batch = WriteBatch::new();
        let mut stored = 0u64;
        for (file_num, offset, size, height, dup, hash, main_branch) in records {
            if self.db.stored_header(height, dup)?.is_some() {
                continue;
            }
            if mapped.as_ref().map(|m| m.ordinal) != Some(file_num) {
                let file_info = files
                    .file(file_num)
                    .ok_or(ChainError::NotFound("block file"))?;
                mapped = Some(MappedBlockFile::open(file_info)?);
            }
            let data = mapped.as_ref().expect("mapped file").data();
            let begin = offset as usize + 8;
            let end = begin + size as usize;
            if end > data.len() {
                return Err(ChainError::Corruption("block extends past file end").into());
            }
            match self.writer.add_raw_block(
                &chain,
                file_num,
                offset,
                &data[begin..end],
                true,
                &mut batch,
            ) {
                Ok(_) | Err(ChainError::BlockTxData(_)) => {}
                Err(err) => return Err(err.into()),
            }
            if main_branch && height >= info.top_blk_hgt {
                info.top_blk_hgt = height;
                info.top_blk_hash = hash;
            }
            stored += 1;
            if batch.approx_bytes() >= UPDATE_BYTES_THRESH {
                self.db.put_sync_info(&mut batch, &info);
                self.db.commit(&batch)?;
                batch = WriteBatch::new();
            }
        }
        self.db.put_sync_info(&mut batch, &info);
        self.db.commit(&batch)?;
        log_info!("stored {stored} raw blocks, top height {}", info.top_blk_hgt);
        Ok(())
    }

    fn undo_stale_branch(&self, state: &ReorganizationState) -> Result<u32, EngineError> {
        let (path, branch_height) = self.with_chain(|chain| {
            let branch = state.reorg_branch_point.unwrap_or(self.params.genesis_hash);
            let path = state
                .prev_top
                .map(|from| chain.path_down_to(&from, &branch))
                .unwrap_or_default();
            let height = chain.header(&branch).map(|r| r.height).unwrap_or(0);
            let records: Vec<(u32, u8)> = path
                .iter()
                .filter_map(|hash| chain.header(hash).map(|r| (r.height, r.dup)))
                .collect();
            (records, height)
        });
        for (height, dup) in path {
            let applied = self
                .db
                .stored_header(height, dup)?
                .map(|row| row.applied)
                .unwrap_or(false);
            if !applied {
                continue;
            }
            let undo = self
                .db
                .undo_record(height, dup)?
                .ok_or(ChainError::Corruption("undo record missing at startup"))?;
            self.writer.undo_block(&undo, &self.filter)?;
        }
        log_info!(
            "undid stale scan branch down to height {branch_height} ({})",
            hash256_to_hex(&state.reorg_branch_point.unwrap_or_default())
        );
        Ok(branch_height.saturating_add(1))
    }

    /// One tail pass: pick up newly appended frames, organize, store,
    /// apply or reorg. Returns what changed, if anything.
    pub fn tail_update(&self) -> Result<Option<TailOutcome>, EngineError> {
        let frames = {
            let mut files = self.files.lock().expect("file set lock");
            files.refresh()?;
            let mut cursor = self.tail_cursor.lock().expect("tail cursor lock");
            read_new_frames(&files, &mut cursor)?
        };
        if frames.is_empty() {
            return Ok(None);
        }

        let mut chain = self.chain.write().expect("chain lock");
        let prev_top = chain.top_hash();
        let prev_top_height = chain.top_height();
        let mut accepted = 0u32;

        for frame in &frames {
            if frame.payload.len() < HEADER_SIZE {
                log_warn!("short frame in file {} at {}", frame.file_num, frame.offset);
                continue;
            }
            let header = match from_bytes::<BlockHeader>(&frame.payload[..HEADER_SIZE]) {
                Ok(header) => header,
                Err(err) => {
                    log_warn!(
                        "bad header in file {} at {}: {err}",
                        frame.file_num,
                        frame.offset
                    );
                    continue;
                }
            };
            let hash = header.hash();
            chain.add_block(hash, header);
            chain.set_file_location(
                &hash,
                frame.file_num,
                frame.offset,
                frame.payload.len() as u32,
                frame_tx_count(&frame.payload),
            );
            let state = chain.organize();

            let mut batch = WriteBatch::new();
            match self.writer.add_raw_block(
                &chain,
                frame.file_num,
                frame.offset,
                &frame.payload,
                true,
                &mut batch,
            ) {
                Ok(_) => self.db.commit(&batch)?,
                Err(ChainError::BlockTxData(bad)) => {
                    self.db.commit(&batch)?;
                    log_error!("skipping block {} with bad body", hash256_to_hex(&bad));
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            if state.is_reorg() {
                log_warn!("chain reorganization detected");
                self.writer.execute_reorg(&chain, &state, &self.filter)?;
            } else if state.has_new_top && state.new_top == Some(hash) {
                let record = chain.header(&hash).ok_or(ChainError::NotFound("header"))?;
                self.writer
                    .apply_block(record.height, record.dup, &self.filter)?;
            }
            accepted += 1;
        }
        if accepted == 0 {
            return Ok(None);
        }

        let mut info = self.db.sync_info()?;
        info.top_blk_hgt = chain.top_height();
        if let Some(top) = chain.top_hash() {
            info.top_blk_hash = top;
        }
        let mut batch = WriteBatch::new();
        self.db.put_sync_info(&mut batch, &info);
        self.db.commit(&batch)?;

        // Summarize the whole pass relative to where the tip started.
        let state = match prev_top {
            Some(prev) => chain
                .find_reorg_point_from_block(&prev)
                .ok_or(ChainError::NotFound("previous top header"))?,
            None => ReorganizationState {
                new_top: chain.top_hash(),
                prev_top: None,
                has_new_top: chain.top_hash().is_some(),
                prev_top_still_valid: true,
                reorg_branch_point: None,
            },
        };

        let confirm_from = if state.prev_top_still_valid {
            prev_top_height.saturating_add(1)
        } else {
            state
                .reorg_branch_point
                .and_then(|hash| chain.header(&hash).map(|r| r.height + 1))
                .unwrap_or(0)
        };
        let confirm_from = if prev_top.is_none() { 0 } else { confirm_from };
        let mut confirmed = HashMap::new();
        for height in confirm_from..=chain.top_height() {
            let Some(hash) = chain.main_chain_hash(height) else {
                continue;
            };
            let Some(record) = chain.header(&hash) else {
                continue;
            };
            for (tx_key, stored_tx) in self.db.block_txs(BlockKey::new(height, record.dup))? {
                confirmed.insert(stored_tx.txid, tx_key);
            }
        }

        Ok(Some(TailOutcome {
            state,
            confirmed,
            prev_top_height,
        }))
    }

    pub fn prune_mode(&self) -> PruneMode {
        self.prune
    }
}

/// Best-effort tx count from the CompactSize after the header.
fn frame_tx_count(payload: &[u8]) -> u32 {
    let mut input = &payload[HEADER_SIZE.min(payload.len())..];
    input.take_compact_size().map(|n| n as u32).unwrap_or(0)
}
