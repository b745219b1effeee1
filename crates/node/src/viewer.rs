//! Top-level façade: owns the wallet groups, the mempool and the
//! notification fan-out over the engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use stashd_index::filter::RegistrationBatch;
use stashd_index::keys::{TxioKey, MAX_HEIGHT};
use stashd_index::ssh::ScriptHistory;
use stashd_index::stored::{StoredTx, StoredTxOut};
use stashd_index::ChainError;
use stashd_log::{log_error, log_info};
use stashd_params::Hash256;
use stashd_storage::KeyValueStore;

use crate::sync::Engine;
use crate::wallet::{
    LedgerEntry, ScanAction, ScanData, SortOrder, Wallet, WalletError, WalletGroup, ZC_HEIGHT,
};
use crate::zeroconf::{NotificationPacket, PurgePacket, ZcError, ZeroConfContainer};

pub const GROUP_WALLET: usize = 0;
pub const GROUP_LOCKBOX: usize = 1;
const GROUP_COUNT: usize = 2;

/// The four event kinds fanned out to registered wallets.
#[derive(Clone, Debug)]
pub enum Notification {
    Init,
    NewBlock {
        /// Previous tip height on an extension, branch-point height on a
        /// reorganization.
        start_height: u32,
        prev_top_height: u32,
        reorg: bool,
        purge: Option<PurgePacket>,
    },
    ZeroConf {
        packet: NotificationPacket,
    },
    Refresh {
        zc_packet: Option<NotificationPacket>,
    },
}

#[derive(Clone, Debug)]
pub struct UnspentOut {
    pub key: TxioKey,
    pub script: Vec<u8>,
    pub value: i64,
    pub height: u32,
}

pub struct Viewer<S> {
    engine: Arc<Engine<S>>,
    zeroconf: ZeroConfContainer<S>,
    groups: [WalletGroup<S>; GROUP_COUNT],
    update_id: AtomicU64,
    sender: Sender<Notification>,
}

impl<S: KeyValueStore> Viewer<S> {
    pub fn new(engine: Arc<Engine<S>>) -> (Arc<Self>, Receiver<Notification>) {
        let (sender, receiver) = unbounded();
        let zeroconf = ZeroConfContainer::new(engine.db.clone());
        let viewer = Arc::new(Self {
            engine,
            zeroconf,
            groups: [
                WalletGroup::new(SortOrder::Descending),
                WalletGroup::new(SortOrder::Descending),
            ],
            update_id: AtomicU64::new(0),
            sender,
        });
        (viewer, receiver)
    }

    pub fn engine(&self) -> &Arc<Engine<S>> {
        &self.engine
    }

    pub fn zeroconf(&self) -> &ZeroConfContainer<S> {
        &self.zeroconf
    }

    pub fn group(&self, index: usize) -> Result<&WalletGroup<S>, WalletError> {
        self.groups.get(index).ok_or(WalletError::UnknownGroup(index))
    }

    pub fn notify(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }

    /// Drains the notification queue; single-threaded dispatch keeps
    /// wallet updates strictly ordered.
    pub fn run_dispatcher(self: &Arc<Self>, receiver: Receiver<Notification>) {
        for notification in receiver.iter() {
            if let Err(err) = self.scan_wallets(&notification) {
                log_error!("wallet scan failed: {err}");
            }
        }
    }

    // ---- registration -------------------------------------------------

    /// Registers (or extends) a wallet in a group. New scripts of an old
    /// wallet trigger a side scan before the refresh notification fires.
    pub fn register_wallet(
        &self,
        group_index: usize,
        wallet_id: &str,
        scripts: Vec<Vec<u8>>,
        is_new: bool,
    ) -> Result<bool, WalletError> {
        let group = self.group(group_index)?;
        let wallet = match group.wallet(wallet_id) {
            Some(wallet) => wallet,
            None => group.add_wallet(Arc::new(Wallet::new(wallet_id, self.engine.db.clone()))),
        };
        wallet.add_scripts(scripts.iter().cloned());
        self.register_scripts(wallet_id, scripts, is_new)?;
        wallet.set_registered();
        Ok(true)
    }

    /// Adds scripts to an already registered wallet.
    pub fn register_addresses(
        &self,
        group_index: usize,
        wallet_id: &str,
        scripts: Vec<Vec<u8>>,
        is_new: bool,
    ) -> Result<bool, WalletError> {
        let group = self.group(group_index)?;
        let wallet = group
            .wallet(wallet_id)
            .ok_or_else(|| WalletError::UnknownWallet(wallet_id.to_string()))?;
        wallet.add_scripts(scripts.iter().cloned());
        self.register_scripts(wallet_id, scripts, is_new)?;
        Ok(true)
    }

    fn register_scripts(
        &self,
        wallet_id: &str,
        scripts: Vec<Vec<u8>>,
        is_new: bool,
    ) -> Result<(), WalletError> {
        let batch = RegistrationBatch {
            scripts: scripts.clone(),
            wallet_id: wallet_id.to_string(),
            is_new,
            scan_from: 0,
        };
        let top = self.engine.top_height();
        let engine = Arc::clone(&self.engine);
        self.engine
            .filter
            .register_batch(&batch, top, move |scan_filter, from, to| {
                engine.writer.scan_history_for_scripts(scan_filter, from, to)
            })?;

        // Completion callback: hand the wallet the mempool slice it now
        // cares about and flag a refresh.
        let script_set: HashSet<Vec<u8>> = scripts.into_iter().collect();
        let txio_map = self.zeroconf.txio_map(|script| script_set.contains(script));
        let zc_packet = NotificationPacket {
            txio_map,
            new_zc_keys: HashSet::new(),
            purge: None,
        };
        self.notify(Notification::Refresh {
            zc_packet: Some(zc_packet),
        });
        Ok(())
    }

    /// Removes a wallet and wipes the history rows of scripts no other
    /// wallet references.
    pub fn unregister_wallet(
        &self,
        group_index: usize,
        wallet_id: &str,
    ) -> Result<(), WalletError> {
        let group = self.group(group_index)?;
        let Some(wallet) = group.remove_wallet(wallet_id) else {
            return Err(WalletError::UnknownWallet(wallet_id.to_string()));
        };
        let mut orphaned: Vec<Vec<u8>> = Vec::new();
        for script in wallet.scripts() {
            let still_used = self.groups.iter().any(|group| {
                group
                    .wallet_ids()
                    .iter()
                    .filter_map(|id| group.wallet(id))
                    .any(|other| other.has_script(&script))
            });
            if !still_used {
                orphaned.push(script);
            }
        }
        if !orphaned.is_empty() {
            self.engine.filter.unregister(&orphaned)?;
        }
        Ok(())
    }

    // ---- scanning -----------------------------------------------------

    /// The hot path: maps a notification onto a scan range and runs it
    /// through every group. Returns the zero-conf ledger entries the
    /// groups produced, merged back for downstream consumers.
    pub fn scan_wallets(
        &self,
        notification: &Notification,
    ) -> Result<Vec<LedgerEntry>, WalletError> {
        let top = self.engine.top_height();
        let start_block;
        let end_block;
        let prev_top_height;
        let mut reorg = false;
        let mut refresh = false;
        let action;
        let mut zc_map = HashMap::new();
        let mut new_zc_keys = HashSet::new();
        let mut invalidated_zc_keys = HashSet::new();
        let mut mined_txio_keys = Vec::new();

        match notification {
            Notification::Init => {
                start_block = 0;
                end_block = top;
                prev_top_height = 0;
                refresh = true;
                action = ScanAction::Init;
            }
            Notification::NewBlock {
                start_height,
                prev_top_height: prev,
                reorg: was_reorg,
                purge,
            } => {
                start_block = *start_height;
                end_block = top;
                prev_top_height = *prev;
                reorg = *was_reorg;
                if let Some(packet) = purge {
                    invalidated_zc_keys = packet.invalidated_zc_keys.clone();
                    mined_txio_keys = packet.mined_txio_keys.clone();
                }
                action = ScanAction::NewBlock;
            }
            Notification::ZeroConf { packet } => {
                zc_map = packet.txio_map.clone();
                new_zc_keys = packet.new_zc_keys.clone();
                if let Some(purge) = &packet.purge {
                    invalidated_zc_keys = purge.invalidated_zc_keys.clone();
                    mined_txio_keys = purge.mined_txio_keys.clone();
                }
                start_block = top;
                end_block = top;
                prev_top_height = top;
                action = ScanAction::ZeroConf;
            }
            Notification::Refresh { zc_packet } => {
                if let Some(packet) = zc_packet {
                    zc_map = packet.txio_map.clone();
                    new_zc_keys = packet.new_zc_keys.clone();
                }
                start_block = ZC_HEIGHT;
                end_block = top;
                prev_top_height = top;
                refresh = true;
                action = ScanAction::Refresh;
            }
        }

        let zc_index = self.zeroconf.key_index();
        let update_id = self.update_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut merged = Vec::new();

        for group in &self.groups {
            let mut group_start = start_block;
            if group.page_history(refresh)? {
                if let Some(bottom) = group.newest_page_bottom() {
                    group_start = group_start.min(bottom);
                }
            }
            if group_start == ZC_HEIGHT {
                // Refresh with no pages yet: rescan everything tracked.
                group_start = 0;
            }
            let data = ScanData {
                prev_top_height,
                start_block: group_start,
                end_block,
                reorg,
                action,
                zc_map: zc_map.clone(),
                zc_index: zc_index.clone(),
                new_zc_keys: new_zc_keys.clone(),
                invalidated_zc_keys: invalidated_zc_keys.clone(),
                mined_txio_keys: mined_txio_keys.clone(),
            };
            merged.extend(group.scan_wallets(&data, update_id)?);
        }
        Ok(merged)
    }

    pub fn current_update_id(&self) -> u64 {
        self.update_id.load(Ordering::SeqCst)
    }

    // ---- tail integration --------------------------------------------

    /// Polls the engine for appended blocks; feeds the mempool and emits
    /// the NewBlock notification.
    pub fn process_tail_update(&self) -> Result<bool, WalletError> {
        let outcome = match self.engine.tail_update() {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return Ok(false),
            Err(err) => {
                log_error!("tail update failed: {err}");
                return Ok(false);
            }
        };
        let mut purge = self
            .zeroconf
            .process_new_block(&outcome.confirmed)
            .unwrap_or_default();
        if outcome.state.is_reorg() {
            if let Some(reorg_purge) = self.zeroconf.process_reorg() {
                purge
                    .invalidated_zc_keys
                    .extend(reorg_purge.invalidated_zc_keys);
            }
        }
        // A fork block that did not move the tip is not an event.
        if !outcome.state.has_new_top && purge.is_empty() {
            return Ok(false);
        }
        // On a reorg the scan restarts at the branch point.
        let reorg = !outcome.state.prev_top_still_valid;
        let start_height = if reorg {
            outcome
                .state
                .reorg_branch_point
                .and_then(|hash| self.engine.header_height(&hash))
                .unwrap_or(0)
        } else {
            outcome.prev_top_height
        };
        self.notify(Notification::NewBlock {
            start_height,
            prev_top_height: outcome.prev_top_height.saturating_add(1),
            reorg,
            purge: if purge.is_empty() { None } else { Some(purge) },
        });
        Ok(true)
    }

    /// Accepts a raw unconfirmed tx and emits the ZC notification.
    pub fn submit_zero_conf(&self, raw: Vec<u8>) -> Result<(), ZcError> {
        let packet = self.zeroconf.insert(raw)?;
        self.notify(Notification::ZeroConf { packet });
        Ok(())
    }

    // ---- queries ------------------------------------------------------

    pub fn tx_by_hash(&self, txid: &Hash256) -> Result<Option<StoredTx>, ChainError> {
        if let Some(entry) = self.zeroconf.entry(txid) {
            return Ok(Some(StoredTx {
                txid: entry.txid,
                num_txout: entry.tx.vout.len() as u32,
                raw: entry.raw.clone(),
            }));
        }
        match self.engine.db.tx_key_for_hash(txid)? {
            Some(key) => self.engine.db.stored_tx(key),
            None => Ok(None),
        }
    }

    pub fn txout_by_key(&self, key: TxioKey) -> Result<Option<StoredTxOut>, ChainError> {
        self.engine.db.stored_txout(key)
    }

    pub fn script_balance(&self, script: &[u8]) -> Result<ScriptHistory, ChainError> {
        Ok(self
            .engine
            .db
            .script_history(script)?
            .unwrap_or_default())
    }

    /// Confirmed unspent outputs for a set of scripts.
    pub fn unspent_txouts_for_scripts(
        &self,
        scripts: &[Vec<u8>],
    ) -> Result<Vec<UnspentOut>, ChainError> {
        let mut unspent = Vec::new();
        for script in scripts {
            for pair in self
                .engine
                .db
                .txios_for_script_range(script, 0, MAX_HEIGHT)?
            {
                if pair.txin_key.is_some() {
                    continue;
                }
                let key = pair.txout_key;
                let block = key.tx_key().block_key();
                if self.engine.db.valid_dup(block.height())? != Some(block.dup()) {
                    continue;
                }
                let Some(row) = self.engine.db.stored_txout(key)? else {
                    continue;
                };
                if row.spent_by.is_some() {
                    continue;
                }
                unspent.push(UnspentOut {
                    key,
                    script: script.clone(),
                    value: row.value,
                    height: block.height(),
                });
            }
        }
        Ok(unspent)
    }

    /// Zero-conf outputs paying a script, minus those consumed within
    /// the mempool.
    pub fn unspent_zc_for_script(&self, script: &[u8]) -> Vec<(TxioKey, i64)> {
        self.zeroconf.unspent_for_script(script)
    }

    pub fn ledger_delegate_for_group(
        self: &Arc<Self>,
        group_index: usize,
    ) -> Result<LedgerDelegate<S>, WalletError> {
        self.group(group_index)?;
        Ok(LedgerDelegate {
            viewer: Arc::clone(self),
            target: DelegateTarget::Group(group_index),
        })
    }

    pub fn ledger_delegate_for_script(
        self: &Arc<Self>,
        script: Vec<u8>,
    ) -> LedgerDelegate<S> {
        LedgerDelegate {
            viewer: Arc::clone(self),
            target: DelegateTarget::Script(script),
        }
    }

    pub fn send_init(&self) {
        log_info!("viewer online, fanning out init");
        self.notify(Notification::Init);
    }
}

enum DelegateTarget {
    Group(usize),
    Script(Vec<u8>),
}

/// Paged-history handle detached from the viewer's lifetime.
pub struct LedgerDelegate<S> {
    viewer: Arc<Viewer<S>>,
    target: DelegateTarget,
}

impl<S: KeyValueStore> LedgerDelegate<S> {
    pub fn page_count(&self) -> usize {
        match &self.target {
            DelegateTarget::Group(index) => self
                .viewer
                .group(*index)
                .map(|group| group.page_count().max(1))
                .unwrap_or(1),
            DelegateTarget::Script(_) => 1,
        }
    }

    pub fn history_page(&self, page_id: usize) -> Result<Vec<LedgerEntry>, WalletError> {
        match &self.target {
            DelegateTarget::Group(index) => {
                let group = self.viewer.group(*index)?;
                if group.page_count() == 0 {
                    return Ok(Vec::new());
                }
                group.get_history_page(page_id, self.viewer.current_update_id(), false, false)
            }
            DelegateTarget::Script(script) => {
                if page_id != 0 {
                    return Err(WalletError::PageOutOfRange {
                        page: page_id,
                        count: 1,
                    });
                }
                let wallet = Wallet::new("script", self.viewer.engine.db.clone());
                wallet.add_scripts([script.clone()]);
                let entries =
                    wallet.update_ledgers_from_txio(&HashMap::new(), 0, MAX_HEIGHT)?;
                Ok(entries.into_values().collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;

    use crossbeam_channel::Receiver;
    use stashd_index::writer::{DbMode, PruneMode};
    use stashd_params::{chain_params, ChainParams, Network};
    use stashd_primitives::block::{Block, BlockHeader};
    use stashd_primitives::encoding::to_bytes;
    use stashd_primitives::outpoint::OutPoint;
    use stashd_primitives::transaction::{Transaction, TxIn, TxOut};
    use stashd_storage::memory::MemoryStore;
    use stashd_storage::{Column, KeyValueStore};
    use tempfile::TempDir;

    fn p2pkh_script(tag: u8) -> Vec<u8> {
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[0x76, 0xa9, 0x14]);
        script.extend_from_slice(&[tag; 20]);
        script.extend_from_slice(&[0x88, 0xac]);
        script
    }

    fn coinbase_tx(tag: u32, script: Vec<u8>, value: i64) -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: tag.to_le_bytes().to_vec(),
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value,
                script_pubkey: script,
            }],
            lock_time: 0,
        }
    }

    fn make_block(prev: [u8; 32], nonce: u32, transactions: Vec<Transaction>) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_block: prev,
                merkle_root: [0u8; 32],
                time: 1_700_000_000 + nonce,
                bits: 0x207f_ffff,
                nonce,
            },
            transactions,
        }
    }

    fn append_block(dir: &Path, params: &ChainParams, block: &Block) {
        let payload = to_bytes(block);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("blk00000.dat"))
            .expect("open block file");
        file.write_all(&params.magic).expect("magic");
        file.write_all(&(payload.len() as u32).to_le_bytes())
            .expect("size");
        file.write_all(&payload).expect("payload");
    }

    struct Rig {
        viewer: Arc<Viewer<MemoryStore>>,
        receiver: Receiver<Notification>,
        params: ChainParams,
        dir: TempDir,
    }

    impl Rig {
        /// Engine over a temp block dir seeded with `blocks`, synced.
        fn new(blocks: &[Block]) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let mut params = chain_params(Network::Unit);
            if let Some(genesis) = blocks.first() {
                params.genesis_hash = genesis.header.hash();
            }
            for block in blocks {
                append_block(dir.path(), &params, block);
            }
            let engine = Engine::new(
                params.clone(),
                Arc::new(MemoryStore::new()),
                DbMode::Bare,
                PruneMode::None,
                dir.path(),
            )
            .expect("engine");
            let engine = Arc::new(engine);
            engine.initial_sync(false).expect("initial sync");
            let (viewer, receiver) = Viewer::new(engine);
            Self {
                viewer,
                receiver,
                params,
                dir,
            }
        }

        /// Runs every queued notification through the scanner.
        fn drain(&self) -> Vec<LedgerEntry> {
            let mut merged = Vec::new();
            while let Ok(notification) = self.receiver.try_recv() {
                merged.extend(
                    self.viewer
                        .scan_wallets(&notification)
                        .expect("wallet scan"),
                );
            }
            merged
        }
    }

    #[test]
    fn empty_chain_initial_sync_is_quiet() {
        let rig = Rig::new(&[]);
        assert_eq!(rig.viewer.engine().top_height(), 0);
        assert!(rig.viewer.group(GROUP_LOCKBOX).is_ok());
        assert!(rig.viewer.group(GROUP_COUNT).is_err());
        rig.viewer.send_init();
        let merged = rig.drain();
        assert!(merged.is_empty());
        // No history rows anywhere.
        let rows = rig
            .viewer
            .engine()
            .db
            .store()
            .scan_prefix(Column::Ssh, &[])
            .expect("scan");
        assert!(rows.is_empty());
        assert!(rig.viewer.zeroconf().is_empty());
    }

    #[test]
    fn registered_wallet_sees_new_block_credit() {
        let script_g = p2pkh_script(0x01);
        let script_s1 = p2pkh_script(0x11);
        let genesis = make_block([0u8; 32], 0, vec![coinbase_tx(0, script_g.clone(), 50)]);
        let rig = Rig::new(&[genesis.clone()]);

        rig.viewer
            .register_wallet(GROUP_WALLET, "W", vec![script_s1.clone()], false)
            .expect("register");
        rig.drain();

        // Block 1 pays the tracked script.
        let block1 = make_block(
            genesis.header.hash(),
            1,
            vec![coinbase_tx(1, script_s1.clone(), 50)],
        );
        append_block(rig.dir.path(), &rig.params, &block1);
        assert!(rig.viewer.process_tail_update().expect("tail"));
        rig.drain();

        let totals = rig
            .viewer
            .script_balance(&script_s1)
            .expect("script balance");
        assert_eq!(totals.balance, 50);

        let wallet = rig
            .viewer
            .group(GROUP_WALLET)
            .expect("group")
            .wallet("W")
            .expect("wallet");
        let ledger = wallet.full_ledger();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].value, 50);
        assert_eq!(ledger[0].height, 1);
        assert!(ledger[0].is_coinbase);
        assert_eq!(wallet.balance().expect("balance"), 50);
        assert!(wallet.last_update_id() > 0);
    }

    #[test]
    fn double_registration_has_no_extra_effects() {
        let script_g = p2pkh_script(0x01);
        let script_s1 = p2pkh_script(0x11);
        let genesis = make_block([0u8; 32], 0, vec![coinbase_tx(0, script_g.clone(), 50)]);
        let block1 = make_block(
            genesis.header.hash(),
            1,
            vec![coinbase_tx(1, script_s1.clone(), 40)],
        );
        let rig = Rig::new(&[genesis, block1]);

        rig.viewer
            .register_wallet(GROUP_WALLET, "W", vec![script_s1.clone()], false)
            .expect("register");
        rig.drain();
        let first = rig.viewer.script_balance(&script_s1).expect("balance");
        assert_eq!(first.balance, 40);
        assert_eq!(first.txio_count, 1);

        rig.viewer
            .register_wallet(GROUP_WALLET, "W", vec![script_s1.clone()], false)
            .expect("re-register");
        rig.drain();
        let second = rig.viewer.script_balance(&script_s1).expect("balance");
        assert_eq!(second, first);
    }

    #[test]
    fn zero_conf_lifecycle_through_confirmation() {
        let script_g = p2pkh_script(0x01);
        let script_s1 = p2pkh_script(0x11);
        let genesis = make_block([0u8; 32], 0, vec![coinbase_tx(0, script_g.clone(), 50)]);
        let rig = Rig::new(&[genesis.clone()]);

        rig.viewer
            .register_wallet(GROUP_WALLET, "W", vec![script_s1.clone()], false)
            .expect("register");
        rig.drain();

        // T1 spends the genesis coinbase to the tracked script.
        let t1 = Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint {
                    txid: genesis.transactions[0].txid(),
                    index: 0,
                },
                script_sig: vec![0x01],
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value: 50,
                script_pubkey: script_s1.clone(),
            }],
            lock_time: 0,
        };
        rig.viewer
            .submit_zero_conf(to_bytes(&t1))
            .expect("zero-conf accept");
        let zc_ledgers = rig.drain();
        assert_eq!(zc_ledgers.len(), 1);
        assert_eq!(zc_ledgers[0].value, 50);
        assert!(zc_ledgers[0].is_zero_conf());
        assert_eq!(rig.viewer.unspent_zc_for_script(&script_s1).len(), 1);

        let wallet = rig
            .viewer
            .group(GROUP_WALLET)
            .expect("group")
            .wallet("W")
            .expect("wallet");
        assert_eq!(wallet.unconfirmed_delta(), 50);
        assert_eq!(
            rig.viewer
                .group(GROUP_WALLET)
                .expect("group")
                .valid_zc_keys()
                .len(),
            1
        );

        // T1 gets mined; the zero-conf entry dissolves into history.
        let block1 = make_block(
            genesis.header.hash(),
            1,
            vec![coinbase_tx(1, p2pkh_script(0x02), 50), t1.clone()],
        );
        append_block(rig.dir.path(), &rig.params, &block1);
        assert!(rig.viewer.process_tail_update().expect("tail"));
        rig.drain();

        assert!(rig.viewer.unspent_zc_for_script(&script_s1).is_empty());
        assert!(rig.viewer.zeroconf().is_empty());
        assert_eq!(wallet.unconfirmed_delta(), 0);
        let ledger = wallet.full_ledger();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].height, 1);
        assert_eq!(ledger[0].value, 50);
        assert_eq!(ledger[0].tx_hash, t1.txid());

        // The confirmed copy is queryable, the zc copy rejected.
        assert!(rig
            .viewer
            .tx_by_hash(&t1.txid())
            .expect("tx lookup")
            .is_some());
        assert!(matches!(
            rig.viewer.submit_zero_conf(to_bytes(&t1)),
            Err(ZcError {
                kind: crate::zeroconf::ZcErrorKind::AlreadyConfirmed,
                ..
            })
        ));
    }

    #[test]
    fn filter_unregister_and_utxo_queries() {
        let script_g = p2pkh_script(0x01);
        let script_a = p2pkh_script(0x11);
        let script_b = p2pkh_script(0x22);
        let genesis = make_block([0u8; 32], 0, vec![coinbase_tx(0, script_g.clone(), 50)]);
        let block1 = make_block(
            genesis.header.hash(),
            1,
            vec![coinbase_tx(1, script_a.clone(), 30)],
        );
        let block2 = make_block(
            block1.header.hash(),
            2,
            vec![coinbase_tx(2, script_b.clone(), 20)],
        );
        let rig = Rig::new(&[genesis, block1, block2]);

        rig.viewer
            .register_wallet(GROUP_WALLET, "W1", vec![script_a.clone()], false)
            .expect("register w1");
        rig.viewer
            .register_wallet(GROUP_WALLET, "W2", vec![script_b.clone()], false)
            .expect("register w2");
        // Late address add goes through the side-scan path too.
        rig.viewer
            .register_addresses(GROUP_WALLET, "W1", vec![script_g.clone()], false)
            .expect("register addresses");
        rig.viewer.send_init();
        rig.drain();

        let group = rig.viewer.group(GROUP_WALLET).expect("group");
        assert_eq!(group.wallet_count(), 2);
        assert_eq!(group.order(), SortOrder::Descending);
        let w1 = group.wallet("W1").expect("w1");
        assert!(w1.is_registered());
        assert_eq!(w1.full_ledger().len(), 2);

        // Unspent outputs across both tracked scripts.
        let unspent = rig
            .viewer
            .unspent_txouts_for_scripts(&[script_a.clone(), script_b.clone()])
            .expect("unspent");
        assert_eq!(unspent.len(), 2);
        let row = rig
            .viewer
            .txout_by_key(unspent[0].key)
            .expect("txout lookup")
            .expect("txout row");
        assert!(row.spent_by.is_none());

        // Narrowing the ui filter hides the other wallet's ledger.
        let changed = group
            .update_ledger_filter(&["W1".to_string()])
            .expect("filter");
        assert!(changed);
        let page = group
            .get_history_page(0, rig.viewer.current_update_id(), true, false)
            .expect("page");
        assert!(page.iter().all(|entry| entry.wallet_id == "W1"));

        // Unregistering drops the wallet and wipes its history rows.
        rig.viewer
            .unregister_wallet(GROUP_WALLET, "W2")
            .expect("unregister");
        assert!(!group.has_wallet("W2"));
        assert!(!rig.viewer.engine().filter.contains(&script_b));
        assert!(rig
            .viewer
            .engine()
            .db
            .script_history(&script_b)
            .expect("ssh read")
            .is_none());
        assert!(matches!(
            rig.viewer.unregister_wallet(GROUP_WALLET, "W2"),
            Err(WalletError::UnknownWallet(_))
        ));

        group.reset();
        assert!(group.wallet("W1").expect("w1").full_ledger().is_empty());
    }

    #[test]
    fn group_history_pages_serve_ledgers() {
        let script_g = p2pkh_script(0x01);
        let script_s1 = p2pkh_script(0x11);
        let genesis = make_block([0u8; 32], 0, vec![coinbase_tx(0, script_g.clone(), 50)]);
        let mut blocks = vec![genesis.clone()];
        let mut prev = genesis.header.hash();
        for i in 1..=3u32 {
            let block = make_block(prev, i, vec![coinbase_tx(i, script_s1.clone(), 10)]);
            prev = block.header.hash();
            blocks.push(block);
        }
        let rig = Rig::new(&blocks);

        rig.viewer
            .register_wallet(GROUP_WALLET, "W", vec![script_s1.clone()], false)
            .expect("register");
        rig.viewer.send_init();
        rig.drain();

        let delegate = rig
            .viewer
            .ledger_delegate_for_group(GROUP_WALLET)
            .expect("delegate");
        assert!(delegate.page_count() >= 1);
        let page = delegate.history_page(0).expect("page");
        assert_eq!(page.len(), 3);
        // Descending group order: newest entry first.
        assert_eq!(page[0].height, 3);
        assert_eq!(page[2].height, 1);

        let script_delegate = rig.viewer.ledger_delegate_for_script(script_s1.clone());
        let entries = script_delegate.history_page(0).expect("script page");
        assert_eq!(entries.len(), 3);
        assert!(script_delegate.history_page(1).is_err());
    }
}
