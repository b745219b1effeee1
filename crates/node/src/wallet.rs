//! Wallets, wallet groups and the paged history view.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use stashd_index::db::IndexDb;
use stashd_index::keys::TxKey;
use stashd_index::ssh::TxIoPair;
use stashd_index::ChainError;
use stashd_params::Hash256;
use stashd_storage::KeyValueStore;

/// Roughly how many tx events one history page aggregates.
pub const PAGE_TARGET: u32 = 100;

/// Sentinel height for unconfirmed ledger entries.
pub const ZC_HEIGHT: u32 = u32::MAX;

#[derive(Debug)]
pub enum WalletError {
    PageOutOfRange { page: usize, count: usize },
    UnknownWallet(String),
    UnknownGroup(usize),
    Chain(ChainError),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::PageOutOfRange { page, count } => {
                write!(f, "page {page} out of range ({count} pages)")
            }
            WalletError::UnknownWallet(id) => write!(f, "wallet {id} is not registered"),
            WalletError::UnknownGroup(index) => write!(f, "no wallet group {index}"),
            WalletError::Chain(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<ChainError> for WalletError {
    fn from(err: ChainError) -> Self {
        WalletError::Chain(err)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanAction {
    Init,
    NewBlock,
    ZeroConf,
    Refresh,
}

/// Everything a wallet scan pass needs to know about one notification.
#[derive(Clone, Debug)]
pub struct ScanData {
    pub prev_top_height: u32,
    pub start_block: u32,
    pub end_block: u32,
    pub reorg: bool,
    pub action: ScanAction,
    pub zc_map: HashMap<Vec<u8>, Vec<TxIoPair>>,
    /// zc tx key -> txid, for ledger hash resolution.
    pub zc_index: HashMap<TxKey, Hash256>,
    pub new_zc_keys: HashSet<TxKey>,
    pub invalidated_zc_keys: HashSet<TxKey>,
    pub mined_txio_keys: Vec<(TxKey, TxKey)>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerEntry {
    pub wallet_id: String,
    pub tx_hash: Hash256,
    pub value: i64,
    pub height: u32,
    pub tx_index: u16,
    pub is_coinbase: bool,
    pub sent_to_self: bool,
}

impl LedgerEntry {
    pub fn is_zero_conf(&self) -> bool {
        self.height == ZC_HEIGHT
    }

    fn sort_key(&self) -> (u32, u16, Hash256) {
        (self.height, self.tx_index, self.tx_hash)
    }
}

type LedgerKey = (u32, u16, Hash256);

#[derive(Default)]
struct WalletCache {
    ledger: BTreeMap<LedgerKey, LedgerEntry>,
    zc_ledger: BTreeMap<TxKey, LedgerEntry>,
    valid_zc_keys: HashSet<TxKey>,
    last_update_id: u64,
}

pub struct Wallet<S> {
    pub id: String,
    db: IndexDb<S>,
    scripts: RwLock<HashSet<Vec<u8>>>,
    cache: Mutex<WalletCache>,
    ui_filter: AtomicBool,
    registered: AtomicBool,
}

/// Per-tx accumulation while folding txio pairs into ledger entries.
#[derive(Default)]
struct TxFold {
    value: i64,
    credited: bool,
    debited: bool,
    is_coinbase: bool,
}

impl<S: KeyValueStore> Wallet<S> {
    pub fn new(id: impl Into<String>, db: IndexDb<S>) -> Self {
        Self {
            id: id.into(),
            db,
            scripts: RwLock::new(HashSet::new()),
            cache: Mutex::new(WalletCache::default()),
            ui_filter: AtomicBool::new(true),
            registered: AtomicBool::new(false),
        }
    }

    pub fn add_scripts(&self, scripts: impl IntoIterator<Item = Vec<u8>>) {
        let mut guard = self.scripts.write().expect("wallet scripts lock");
        guard.extend(scripts);
    }

    pub fn scripts(&self) -> HashSet<Vec<u8>> {
        self.scripts.read().expect("wallet scripts lock").clone()
    }

    pub fn has_script(&self, script: &[u8]) -> bool {
        self.scripts
            .read()
            .expect("wallet scripts lock")
            .contains(script)
    }

    pub fn ui_filter(&self) -> bool {
        self.ui_filter.load(Ordering::Relaxed)
    }

    pub fn set_ui_filter(&self, enabled: bool) {
        self.ui_filter.store(enabled, Ordering::Relaxed);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Relaxed)
    }

    pub fn set_registered(&self) {
        self.registered.store(true, Ordering::Relaxed);
    }

    /// Confirmed balance across all scripts.
    pub fn balance(&self) -> Result<i64, ChainError> {
        let mut balance = 0i64;
        for script in self.scripts().iter() {
            if let Some(totals) = self.db.script_history(script)? {
                balance += totals.balance;
            }
        }
        Ok(balance)
    }

    /// Net effect of the currently valid zero-conf entries.
    pub fn unconfirmed_delta(&self) -> i64 {
        let cache = self.cache.lock().expect("wallet cache lock");
        cache.zc_ledger.values().map(|entry| entry.value).sum()
    }

    /// Update id of the last notification scan that touched this wallet.
    pub fn last_update_id(&self) -> u64 {
        self.cache.lock().expect("wallet cache lock").last_update_id
    }

    pub fn valid_zc_keys(&self) -> HashSet<TxKey> {
        self.cache
            .lock()
            .expect("wallet cache lock")
            .valid_zc_keys
            .clone()
    }

    /// Height -> tx-event count across the wallet's scripts.
    pub fn ssh_summary(&self) -> Result<BTreeMap<u32, u32>, ChainError> {
        let mut summary = BTreeMap::new();
        for script in self.scripts().iter() {
            for (height, count) in self.db.ssh_summary(script)? {
                *summary.entry(height).or_insert(0) += count;
            }
        }
        Ok(summary)
    }

    pub fn txio_for_range(&self, start: u32, end: u32) -> Result<Vec<TxIoPair>, ChainError> {
        let mut txio = Vec::new();
        for script in self.scripts().iter() {
            txio.extend(self.db.txios_for_script_range(script, start, end)?);
        }
        Ok(txio)
    }

    /// Folds txio pairs into ledger entries for `[start..end]`. The group
    /// pager hands in its own (empty) txio map; wallets derive the real
    /// pairs from their sub-histories.
    pub fn update_ledgers_from_txio(
        &self,
        _group_txio: &HashMap<Vec<u8>, TxIoPair>,
        start: u32,
        end: u32,
    ) -> Result<BTreeMap<LedgerKey, LedgerEntry>, WalletError> {
        let txio = self.txio_for_range(start, end)?;
        self.fold_txio(&txio, start, end, &HashMap::new())
    }

    fn fold_txio(
        &self,
        txio: &[TxIoPair],
        start: u32,
        end: u32,
        zc_index: &HashMap<TxKey, Hash256>,
    ) -> Result<BTreeMap<LedgerKey, LedgerEntry>, WalletError> {
        let mut folds: HashMap<TxKey, TxFold> = HashMap::new();
        for pair in txio {
            let out_tx = pair.txout_key.tx_key();
            match pair.txin_key {
                None => {
                    // Creation-side pair, hosted at its own height.
                    if in_range(out_tx, start, end) {
                        let fold = folds.entry(out_tx).or_default();
                        fold.value += pair.value;
                        fold.credited = true;
                        fold.is_coinbase |= pair.is_coinbase;
                    }
                }
                Some(in_key) => {
                    let in_tx = in_key.tx_key();
                    // Same-block pairs host both sides; zero-conf pairs
                    // always live in the spender's packet, and the parent
                    // credit is recorded from the parent's own pairs.
                    let intra =
                        !in_tx.is_zero_conf() && in_tx.block_key() == out_tx.block_key();
                    if intra && in_range(out_tx, start, end) {
                        let fold = folds.entry(out_tx).or_default();
                        fold.value += pair.value;
                        fold.credited = true;
                        fold.is_coinbase |= pair.is_coinbase;
                    }
                    if in_range(in_tx, start, end) {
                        let fold = folds.entry(in_tx).or_default();
                        fold.value -= pair.value;
                        fold.debited = true;
                    }
                }
            }
        }

        let mut entries = BTreeMap::new();
        for (tx_key, fold) in folds {
            let (height, tx_index, tx_hash) = if tx_key.is_zero_conf() {
                let Some(hash) = zc_index.get(&tx_key) else {
                    continue;
                };
                (ZC_HEIGHT, 0u16, *hash)
            } else {
                let Some(stored) = self.db.stored_tx(tx_key)? else {
                    continue;
                };
                (tx_key.height(), tx_key.tx_index(), stored.txid)
            };
            let entry = LedgerEntry {
                wallet_id: self.id.clone(),
                tx_hash,
                value: fold.value,
                height,
                tx_index,
                is_coinbase: fold.is_coinbase,
                sent_to_self: fold.credited && fold.debited && fold.value >= 0,
            };
            entries.insert((height, tx_index, tx_hash), entry);
        }
        Ok(entries)
    }

    /// One notification's worth of updates. Returns the zero-conf ledger
    /// entries newly produced, for merge-back into the notification.
    pub fn scan_wallet(
        &self,
        data: &ScanData,
        update_id: u64,
    ) -> Result<Vec<LedgerEntry>, WalletError> {
        let scripts = self.scripts();
        let mut new_zc_entries = Vec::new();
        let mut cache = self.cache.lock().expect("wallet cache lock");
        cache.last_update_id = update_id;

        if data.reorg {
            cache
                .ledger
                .retain(|(height, _, _), _| *height < data.start_block);
        }

        let scans_blocks = matches!(
            data.action,
            ScanAction::Init | ScanAction::NewBlock | ScanAction::Refresh
        );
        if scans_blocks && data.start_block <= data.end_block && data.end_block != ZC_HEIGHT {
            let txio = self.txio_for_range(data.start_block, data.end_block)?;
            let built = self.fold_txio(&txio, data.start_block, data.end_block, &data.zc_index)?;
            cache.ledger.extend(built);
        }

        // Evicted zero-conf entries disappear from the view.
        for key in &data.invalidated_zc_keys {
            cache.zc_ledger.remove(key);
            cache.valid_zc_keys.remove(key);
        }
        // Mined entries are re-created as confirmed rows by the block
        // scan above.
        for (zc_key, _) in &data.mined_txio_keys {
            cache.zc_ledger.remove(zc_key);
            cache.valid_zc_keys.remove(zc_key);
        }

        // Fold the zero-conf txio restricted to this wallet's scripts.
        let wallet_pairs: Vec<TxIoPair> = data
            .zc_map
            .iter()
            .filter(|(script, _)| scripts.contains(script.as_slice()))
            .flat_map(|(_, pairs)| pairs.iter().copied())
            .collect();
        if !wallet_pairs.is_empty() {
            let built = self.fold_txio(&wallet_pairs, 0, ZC_HEIGHT, &data.zc_index)?;
            for entry in built.into_values() {
                if !entry.is_zero_conf() {
                    continue;
                }
                let Some((zc_key, _)) = data
                    .zc_index
                    .iter()
                    .find(|(_, txid)| **txid == entry.tx_hash)
                else {
                    continue;
                };
                cache.valid_zc_keys.insert(*zc_key);
                if data.new_zc_keys.contains(zc_key) {
                    new_zc_entries.push(entry.clone());
                }
                cache.zc_ledger.insert(*zc_key, entry);
            }
        }

        Ok(new_zc_entries)
    }

    /// Confirmed plus unconfirmed ledger, oldest first.
    pub fn full_ledger(&self) -> Vec<LedgerEntry> {
        let cache = self.cache.lock().expect("wallet cache lock");
        cache
            .ledger
            .values()
            .chain(cache.zc_ledger.values())
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        let mut cache = self.cache.lock().expect("wallet cache lock");
        *cache = WalletCache::default();
    }
}

fn in_range(tx: TxKey, start: u32, end: u32) -> bool {
    if tx.is_zero_conf() {
        return end == ZC_HEIGHT;
    }
    let height = tx.height();
    height >= start && height <= end
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageBounds {
    pub top: u32,
    pub bottom: u32,
    pub count: u32,
}

/// Maps page ids to block ranges and caches built pages. Pages are
/// numbered from oldest (0) to newest.
#[derive(Default)]
pub struct HistoryPager {
    pages: Vec<PageBounds>,
    cache: HashMap<usize, (u64, Vec<LedgerEntry>)>,
}

impl HistoryPager {
    /// Rebuilds the page map from a height -> tx-count summary. Each page
    /// aggregates roughly `PAGE_TARGET` events. Returns true when the
    /// bounds changed.
    pub fn map_history(&mut self, summary: &BTreeMap<u32, u32>) -> bool {
        let mut pages = Vec::new();
        let mut top: Option<u32> = None;
        let mut bottom = 0u32;
        let mut count = 0u32;
        for (height, events) in summary.iter().rev() {
            if top.is_none() {
                top = Some(*height);
            }
            bottom = *height;
            count += events;
            if count >= PAGE_TARGET {
                pages.push(PageBounds {
                    top: top.take().expect("page top"),
                    bottom,
                    count,
                });
                count = 0;
            }
        }
        if let Some(top) = top {
            pages.push(PageBounds { top, bottom, count });
        }
        pages.reverse();
        if pages == self.pages {
            return false;
        }
        self.pages = pages;
        self.cache.clear();
        true
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn bounds(&self, index: usize) -> Option<PageBounds> {
        self.pages.get(index).copied()
    }

    pub fn newest_page_bottom(&self) -> Option<u32> {
        self.pages.last().map(|page| page.bottom)
    }

    pub fn cached(&self, index: usize, update_id: u64) -> Option<Vec<LedgerEntry>> {
        self.cache
            .get(&index)
            .filter(|(cached_id, _)| *cached_id == update_id)
            .map(|(_, entries)| entries.clone())
    }

    pub fn store(&mut self, index: usize, update_id: u64, entries: Vec<LedgerEntry>) {
        self.cache.insert(index, (update_id, entries));
    }

    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}

pub struct WalletGroup<S> {
    wallets: RwLock<BTreeMap<String, Arc<Wallet<S>>>>,
    pager: Mutex<HistoryPager>,
    order: SortOrder,
    /// Serializes page building so the cache is not rebuilt twice.
    ledger_lock: Mutex<()>,
    ui_filter_set: Mutex<BTreeSet<String>>,
    valid_zc_keys: Mutex<HashSet<TxKey>>,
}

impl<S: KeyValueStore> WalletGroup<S> {
    pub fn new(order: SortOrder) -> Self {
        Self {
            wallets: RwLock::new(BTreeMap::new()),
            pager: Mutex::new(HistoryPager::default()),
            order,
            ledger_lock: Mutex::new(()),
            ui_filter_set: Mutex::new(BTreeSet::new()),
            valid_zc_keys: Mutex::new(HashSet::new()),
        }
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn add_wallet(&self, wallet: Arc<Wallet<S>>) -> Arc<Wallet<S>> {
        let mut guard = self.wallets.write().expect("wallet group lock");
        guard
            .entry(wallet.id.clone())
            .or_insert(wallet)
            .clone()
    }

    pub fn remove_wallet(&self, id: &str) -> Option<Arc<Wallet<S>>> {
        self.wallets.write().expect("wallet group lock").remove(id)
    }

    pub fn wallet(&self, id: &str) -> Option<Arc<Wallet<S>>> {
        self.wallets.read().expect("wallet group lock").get(id).cloned()
    }

    pub fn has_wallet(&self, id: &str) -> bool {
        self.wallets.read().expect("wallet group lock").contains_key(id)
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.read().expect("wallet group lock").len()
    }

    pub fn wallet_ids(&self) -> Vec<String> {
        self.wallets
            .read()
            .expect("wallet group lock")
            .keys()
            .cloned()
            .collect()
    }

    fn filtered_wallets(&self) -> Vec<Arc<Wallet<S>>> {
        self.wallets
            .read()
            .expect("wallet group lock")
            .values()
            .filter(|wallet| wallet.ui_filter())
            .cloned()
            .collect()
    }

    fn all_wallets(&self) -> Vec<Arc<Wallet<S>>> {
        self.wallets
            .read()
            .expect("wallet group lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn compute_ssh_summary(&self) -> Result<BTreeMap<u32, u32>, ChainError> {
        let mut summary = BTreeMap::new();
        for wallet in self.filtered_wallets() {
            for (height, count) in wallet.ssh_summary()? {
                *summary.entry(height).or_insert(0) += count;
            }
        }
        Ok(summary)
    }

    /// Recomputes page bounds. Returns true when they changed.
    pub fn page_history(&self, _force: bool) -> Result<bool, ChainError> {
        let summary = self.compute_ssh_summary()?;
        let mut pager = self.pager.lock().expect("pager lock");
        Ok(pager.map_history(&summary))
    }

    pub fn page_count(&self) -> usize {
        self.pager.lock().expect("pager lock").page_count()
    }

    pub fn newest_page_bottom(&self) -> Option<u32> {
        self.pager.lock().expect("pager lock").newest_page_bottom()
    }

    /// Ledger page in the group's configured order. A changed ui-filter
    /// set invalidates the cache regardless of `update_id`.
    pub fn get_history_page(
        &self,
        page_id: usize,
        mut update_id: u64,
        rebuild: bool,
        remap: bool,
    ) -> Result<Vec<LedgerEntry>, WalletError> {
        let _serialized = self.ledger_lock.lock().expect("ledger lock");

        if rebuild || remap {
            self.page_history(remap)?;
            update_id = u64::MAX;
        }

        let count = self.page_count();
        if page_id >= count {
            return Err(WalletError::PageOutOfRange {
                page: page_id,
                count,
            });
        }
        // Pages are stored oldest-first; descending groups serve the
        // newest page as id 0.
        let index = match self.order {
            SortOrder::Ascending => page_id,
            SortOrder::Descending => count - 1 - page_id,
        };

        let wallets = self.filtered_wallets();
        {
            let current: BTreeSet<String> =
                wallets.iter().map(|wallet| wallet.id.clone()).collect();
            let mut stored = self.ui_filter_set.lock().expect("filter set lock");
            if *stored != current {
                *stored = current;
                update_id = u64::MAX;
            }
        }

        let mut pager = self.pager.lock().expect("pager lock");
        if update_id != u64::MAX {
            if let Some(entries) = pager.cached(index, update_id) {
                return Ok(entries);
            }
        }
        let bounds = pager
            .bounds(index)
            .ok_or(WalletError::PageOutOfRange {
                page: page_id,
                count,
            })?;

        let group_txio = Self::txio_for_range(bounds.bottom, bounds.top);
        let mut merged: BTreeMap<LedgerKey, LedgerEntry> = BTreeMap::new();
        for wallet in &wallets {
            let ledgers =
                wallet.update_ledgers_from_txio(&group_txio, bounds.bottom, bounds.top)?;
            merged.extend(ledgers);
        }
        let mut entries: Vec<LedgerEntry> = merged.into_values().collect();
        match self.order {
            SortOrder::Ascending => entries.sort_by_key(|entry| entry.sort_key()),
            SortOrder::Descending => {
                entries.sort_by_key(|entry| entry.sort_key());
                entries.reverse();
            }
        }
        if update_id != u64::MAX {
            pager.store(index, update_id, entries.clone());
        }
        Ok(entries)
    }

    /// Group-level txio aggregation hook. Wallets derive their own
    /// ranges, so this intentionally stays empty.
    fn txio_for_range(_start: u32, _end: u32) -> HashMap<Vec<u8>, TxIoPair> {
        HashMap::new()
    }

    /// Scans every wallet and records the zero-conf keys that remain
    /// valid. Returns zero-conf ledger entries for merge-back.
    pub fn scan_wallets(
        &self,
        data: &ScanData,
        update_id: u64,
    ) -> Result<Vec<LedgerEntry>, WalletError> {
        let mut zc_entries = Vec::new();
        let mut valid = HashSet::new();
        for wallet in self.all_wallets() {
            zc_entries.extend(wallet.scan_wallet(data, update_id)?);
            valid.extend(wallet.valid_zc_keys());
        }
        *self.valid_zc_keys.lock().expect("zc keys lock") = valid;
        Ok(zc_entries)
    }

    /// Zero-conf keys still valid for some wallet, as of the last scan.
    pub fn valid_zc_keys(&self) -> HashSet<TxKey> {
        self.valid_zc_keys.lock().expect("zc keys lock").clone()
    }

    /// Restricts the ui ledger to `ids`. Returns true when the visible
    /// set changed, in which case callers flag a refresh.
    pub fn update_ledger_filter(&self, ids: &[String]) -> Result<bool, ChainError> {
        let mut previous = Vec::new();
        for wallet in self.all_wallets() {
            if wallet.ui_filter() {
                previous.push(wallet.id.clone());
            }
            wallet.set_ui_filter(ids.contains(&wallet.id));
        }
        let mut previous_sorted = previous.clone();
        previous_sorted.sort();
        let mut requested = ids.to_vec();
        requested.sort();
        if previous_sorted == requested {
            return Ok(false);
        }
        self.page_history(true)?;
        Ok(true)
    }

    pub fn reset(&self) {
        for wallet in self.all_wallets() {
            wallet.reset();
        }
        self.pager.lock().expect("pager lock").invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pairs: &[(u32, u32)]) -> BTreeMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn pager_groups_events_into_pages() {
        let mut pager = HistoryPager::default();
        // 250 events spread over five heights: expect two pages.
        let changed = pager.map_history(&summary(&[
            (10, 50),
            (20, 50),
            (30, 60),
            (40, 40),
            (50, 50),
        ]));
        assert!(changed);
        assert_eq!(pager.page_count(), 2);
        // Oldest page first; newest page covers the top heights.
        let newest = pager.bounds(pager.page_count() - 1).expect("newest");
        assert_eq!(newest.top, 50);
        let oldest = pager.bounds(0).expect("oldest");
        assert_eq!(oldest.bottom, 10);
        // Bounds tile the full range.
        assert!(pager.newest_page_bottom().expect("bottom") <= 50);
    }

    #[test]
    fn pager_is_stable_on_unchanged_input() {
        let mut pager = HistoryPager::default();
        let events = summary(&[(10, 120), (20, 30)]);
        assert!(pager.map_history(&events));
        let bounds_before: Vec<PageBounds> =
            (0..pager.page_count()).filter_map(|i| pager.bounds(i)).collect();
        assert!(!pager.map_history(&events));
        let bounds_after: Vec<PageBounds> =
            (0..pager.page_count()).filter_map(|i| pager.bounds(i)).collect();
        assert_eq!(bounds_before, bounds_after);
    }

    #[test]
    fn pager_newest_page_grows_by_one_event() {
        let mut pager = HistoryPager::default();
        assert!(pager.map_history(&summary(&[(10, 120), (20, 30)])));
        let newest_count = pager
            .bounds(pager.page_count() - 1)
            .expect("newest")
            .count;
        assert!(pager.map_history(&summary(&[(10, 120), (20, 31)])));
        let grown = pager
            .bounds(pager.page_count() - 1)
            .expect("newest")
            .count;
        assert_eq!(grown, newest_count + 1);
    }

    #[test]
    fn pager_cache_honors_update_id() {
        let mut pager = HistoryPager::default();
        pager.map_history(&summary(&[(10, 10)]));
        assert!(pager.cached(0, 7).is_none());
        pager.store(0, 7, Vec::new());
        assert!(pager.cached(0, 7).is_some());
        assert!(pager.cached(0, 8).is_none());
        pager.invalidate();
        assert!(pager.cached(0, 7).is_none());
    }

    #[test]
    fn empty_summary_means_no_pages() {
        let mut pager = HistoryPager::default();
        assert!(!pager.map_history(&BTreeMap::new()));
        assert_eq!(pager.page_count(), 0);
        assert!(pager.newest_page_bottom().is_none());
    }
}
