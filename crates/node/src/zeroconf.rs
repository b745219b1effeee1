//! Zero-conf (mempool) container: unconfirmed transactions and their
//! per-script txio view, integrated with the confirmed index.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use stashd_index::db::IndexDb;
use stashd_index::keys::{TxKey, TxioKey};
use stashd_index::ssh::TxIoPair;
use stashd_index::ChainError;
use stashd_log::log_debug;
use stashd_params::{hash256_to_hex, Hash256};
use stashd_primitives::encoding::from_bytes;
use stashd_primitives::outpoint::OutPoint;
use stashd_primitives::transaction::Transaction;
use stashd_storage::KeyValueStore;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ZcErrorKind {
    AlreadyKnown,
    AlreadyConfirmed,
    MissingInputs,
    Undecodable,
    Coinbase,
}

#[derive(Clone, Debug)]
pub struct ZcError {
    pub kind: ZcErrorKind,
    pub message: String,
}

impl ZcError {
    fn new(kind: ZcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ZcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ZcError {}

#[derive(Clone, Debug)]
pub struct ZeroConfEntry {
    pub txid: Hash256,
    pub raw: Vec<u8>,
    pub tx: Transaction,
    pub key: TxKey,
    pub received: u64,
    pub is_rbf: bool,
    /// script -> txio pairs this tx contributes.
    pub txio_by_script: HashMap<Vec<u8>, Vec<TxIoPair>>,
}

/// Keys evicted from the mempool and why.
#[derive(Clone, Debug, Default)]
pub struct PurgePacket {
    pub invalidated_zc_keys: HashSet<TxKey>,
    /// zc key -> confirmed tx key, for txs that got mined.
    pub mined_txio_keys: Vec<(TxKey, TxKey)>,
}

impl PurgePacket {
    pub fn is_empty(&self) -> bool {
        self.invalidated_zc_keys.is_empty() && self.mined_txio_keys.is_empty()
    }
}

/// What a freshly accepted zero-conf tx means for script histories.
#[derive(Clone, Debug, Default)]
pub struct NotificationPacket {
    pub txio_map: HashMap<Vec<u8>, Vec<TxIoPair>>,
    pub new_zc_keys: HashSet<TxKey>,
    pub purge: Option<PurgePacket>,
}

pub struct ZeroConfContainer<S> {
    db: IndexDb<S>,
    entries: RwLock<HashMap<Hash256, Arc<ZeroConfEntry>>>,
    /// outpoint -> spending zc txid, for double-spend and RBF detection.
    spent_outpoints: RwLock<HashMap<OutPoint, Hash256>>,
    counter: AtomicU32,
}

impl<S: KeyValueStore> ZeroConfContainer<S> {
    pub fn new(db: IndexDb<S>) -> Self {
        Self {
            db,
            entries: RwLock::new(HashMap::new()),
            spent_outpoints: RwLock::new(HashMap::new()),
            counter: AtomicU32::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("zc lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("zc lock").is_empty()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.read().expect("zc lock").contains_key(txid)
    }

    pub fn entry(&self, txid: &Hash256) -> Option<Arc<ZeroConfEntry>> {
        self.entries.read().expect("zc lock").get(txid).cloned()
    }

    /// Snapshot of every entry, for notification production.
    pub fn snapshot(&self) -> Vec<Arc<ZeroConfEntry>> {
        self.entries
            .read()
            .expect("zc lock")
            .values()
            .cloned()
            .collect()
    }

    /// zc tx key -> txid for every live entry.
    pub fn key_index(&self) -> HashMap<TxKey, Hash256> {
        self.entries
            .read()
            .expect("zc lock")
            .values()
            .map(|entry| (entry.key, entry.txid))
            .collect()
    }

    /// Full script -> txio map across the mempool, optionally filtered.
    pub fn txio_map(&self, filter: impl Fn(&[u8]) -> bool) -> HashMap<Vec<u8>, Vec<TxIoPair>> {
        let mut map: HashMap<Vec<u8>, Vec<TxIoPair>> = HashMap::new();
        for entry in self.snapshot() {
            for (script, pairs) in &entry.txio_by_script {
                if !filter(script) {
                    continue;
                }
                map.entry(script.clone()).or_default().extend(pairs.iter());
            }
        }
        map
    }

    /// Accepts a raw unconfirmed transaction. All inputs must resolve to
    /// confirmed unspent outputs or earlier zero-conf outputs. An input
    /// overlap with an existing entry is replace-by-fee: the conflicting
    /// entry and its descendants are evicted in the purge packet.
    pub fn insert(&self, raw: Vec<u8>) -> Result<NotificationPacket, ZcError> {
        let tx: Transaction = from_bytes(&raw)
            .map_err(|err| ZcError::new(ZcErrorKind::Undecodable, err.to_string()))?;
        if tx.is_coinbase() {
            return Err(ZcError::new(ZcErrorKind::Coinbase, "coinbase cannot be relayed"));
        }
        let txid = tx.txid();
        if self.contains(&txid) {
            return Err(ZcError::new(ZcErrorKind::AlreadyKnown, hash256_to_hex(&txid)));
        }
        match self.confirmed_key(&txid) {
            Ok(Some(_)) => {
                return Err(ZcError::new(
                    ZcErrorKind::AlreadyConfirmed,
                    hash256_to_hex(&txid),
                ))
            }
            Ok(None) => {}
            Err(err) => return Err(ZcError::new(ZcErrorKind::MissingInputs, err.to_string())),
        }

        // RBF: any input already spent by a live zc entry.
        let mut replaced: HashSet<Hash256> = HashSet::new();
        {
            let spent = self.spent_outpoints.read().expect("zc lock");
            for input in &tx.vin {
                if let Some(conflict) = spent.get(&input.prevout) {
                    replaced.insert(*conflict);
                }
            }
        }
        let is_rbf = !replaced.is_empty();
        let mut purge = PurgePacket::default();
        for conflict in &replaced {
            self.evict_with_descendants(conflict, &mut purge.invalidated_zc_keys);
        }

        let key = TxKey::zero_conf(self.counter.fetch_add(1, Ordering::Relaxed));
        let txio_by_script = self
            .derive_txio(&tx, key)
            .map_err(|err| ZcError::new(ZcErrorKind::MissingInputs, err))?;

        let received = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let entry = Arc::new(ZeroConfEntry {
            txid,
            raw,
            tx,
            key,
            received,
            is_rbf,
            txio_by_script,
        });

        {
            let mut spent = self.spent_outpoints.write().expect("zc lock");
            for input in &entry.tx.vin {
                spent.insert(input.prevout, txid);
            }
        }
        self.entries
            .write()
            .expect("zc lock")
            .insert(txid, Arc::clone(&entry));
        log_debug!("zc accepted {}", hash256_to_hex(&txid));

        Ok(NotificationPacket {
            txio_map: entry.txio_by_script.clone(),
            new_zc_keys: HashSet::from([key]),
            purge: if purge.is_empty() { None } else { Some(purge) },
        })
    }

    /// Confirmation pass: drops entries now mined and entries whose
    /// inputs were double-spent by a confirmed tx.
    pub fn process_new_block(
        &self,
        confirmed: &HashMap<Hash256, TxKey>,
    ) -> Option<PurgePacket> {
        let mut packet = PurgePacket::default();
        let mined: Vec<(Hash256, TxKey, TxKey)> = {
            let entries = self.entries.read().expect("zc lock");
            entries
                .values()
                .filter_map(|entry| {
                    confirmed
                        .get(&entry.txid)
                        .map(|tx_key| (entry.txid, entry.key, *tx_key))
                })
                .collect()
        };
        for (txid, zc_key, tx_key) in &mined {
            self.remove_entry(txid);
            packet.mined_txio_keys.push((*zc_key, *tx_key));
        }

        // Anything whose inputs no longer resolve got double-spent.
        packet
            .invalidated_zc_keys
            .extend(self.purge_unconnectable());

        if packet.is_empty() {
            None
        } else {
            Some(packet)
        }
    }

    /// Reorg pass: every entry is re-verified against the index; entries
    /// that no longer connect are invalidated.
    pub fn process_reorg(&self) -> Option<PurgePacket> {
        let invalidated = self.purge_unconnectable();
        if invalidated.is_empty() {
            None
        } else {
            Some(PurgePacket {
                invalidated_zc_keys: invalidated,
                mined_txio_keys: Vec::new(),
            })
        }
    }

    /// Unspent zero-conf outputs paying `script`, excluding outputs
    /// consumed by other mempool txs.
    pub fn unspent_for_script(&self, script: &[u8]) -> Vec<(TxioKey, i64)> {
        let entries = self.entries.read().expect("zc lock");
        let spent = self.spent_outpoints.read().expect("zc lock");
        let mut out = Vec::new();
        for entry in entries.values() {
            for (index, output) in entry.tx.vout.iter().enumerate() {
                if output.script_pubkey != script {
                    continue;
                }
                let outpoint = OutPoint {
                    txid: entry.txid,
                    index: index as u32,
                };
                if spent.contains_key(&outpoint) {
                    continue;
                }
                out.push((TxioKey::new(entry.key, index as u16), output.value));
            }
        }
        out
    }

    // Only the valid duplicate counts; a tx mined on a losing branch is
    // still eligible for the mempool.
    fn confirmed_key(&self, txid: &Hash256) -> Result<Option<TxKey>, ChainError> {
        for candidate in self.db.tx_hints(txid)? {
            let block = candidate.block_key();
            if self.db.valid_dup(block.height())? == Some(block.dup()) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn derive_txio(
        &self,
        tx: &Transaction,
        key: TxKey,
    ) -> Result<HashMap<Vec<u8>, Vec<TxIoPair>>, String> {
        let mut map: HashMap<Vec<u8>, Vec<TxIoPair>> = HashMap::new();
        let entries = self.entries.read().expect("zc lock");

        for (in_index, input) in tx.vin.iter().enumerate() {
            let in_key = TxioKey::new(key, in_index as u16);
            // Earlier zero-conf output?
            if let Some(parent) = entries.get(&input.prevout.txid) {
                let output = parent
                    .tx
                    .vout
                    .get(input.prevout.index as usize)
                    .ok_or_else(|| "zc input index out of range".to_string())?;
                map.entry(output.script_pubkey.clone())
                    .or_default()
                    .push(TxIoPair {
                        txout_key: TxioKey::new(parent.key, input.prevout.index as u16),
                        txin_key: Some(in_key),
                        value: output.value,
                        is_coinbase: false,
                        from_self: false,
                        main_branch: false,
                    });
                continue;
            }
            // Confirmed unspent output?
            let confirmed = self
                .confirmed_key(&input.prevout.txid)
                .map_err(|err| err.to_string())?
                .ok_or_else(|| format!("unknown input {}", hash256_to_hex(&input.prevout.txid)))?;
            let txout_key = TxioKey::new(confirmed, input.prevout.index as u16);
            let row = self
                .db
                .stored_txout(txout_key)
                .map_err(|err| err.to_string())?
                .ok_or_else(|| "input output row missing".to_string())?;
            if row.spent_by.is_some() {
                return Err("input already spent on chain".to_string());
            }
            map.entry(row.script.clone()).or_default().push(TxIoPair {
                txout_key,
                txin_key: Some(in_key),
                value: row.value,
                is_coinbase: row.is_coinbase,
                from_self: false,
                main_branch: false,
            });
        }

        for (out_index, output) in tx.vout.iter().enumerate() {
            map.entry(output.script_pubkey.clone())
                .or_default()
                .push(TxIoPair {
                    txout_key: TxioKey::new(key, out_index as u16),
                    txin_key: None,
                    value: output.value,
                    is_coinbase: false,
                    from_self: false,
                    main_branch: false,
                });
        }
        Ok(map)
    }

    fn remove_entry(&self, txid: &Hash256) -> Option<Arc<ZeroConfEntry>> {
        let entry = self.entries.write().expect("zc lock").remove(txid)?;
        let mut spent = self.spent_outpoints.write().expect("zc lock");
        for input in &entry.tx.vin {
            if spent.get(&input.prevout) == Some(txid) {
                spent.remove(&input.prevout);
            }
        }
        Some(entry)
    }

    fn evict_with_descendants(&self, txid: &Hash256, evicted: &mut HashSet<TxKey>) {
        let Some(entry) = self.remove_entry(txid) else {
            return;
        };
        evicted.insert(entry.key);
        // Children spend this entry's outputs.
        let children: Vec<Hash256> = {
            let entries = self.entries.read().expect("zc lock");
            entries
                .values()
                .filter(|candidate| {
                    candidate
                        .tx
                        .vin
                        .iter()
                        .any(|input| input.prevout.txid == *txid)
                })
                .map(|candidate| candidate.txid)
                .collect()
        };
        for child in children {
            self.evict_with_descendants(&child, evicted);
        }
    }

    /// Drops every entry whose inputs no longer resolve, cascading to
    /// descendants. Returns the evicted keys.
    fn purge_unconnectable(&self) -> HashSet<TxKey> {
        let mut evicted = HashSet::new();
        loop {
            let stale: Vec<Hash256> = {
                let entries = self.entries.read().expect("zc lock");
                entries
                    .values()
                    .filter(|entry| !self.entry_connects(entry, &entries))
                    .map(|entry| entry.txid)
                    .collect()
            };
            if stale.is_empty() {
                break;
            }
            for txid in stale {
                if let Some(entry) = self.remove_entry(&txid) {
                    evicted.insert(entry.key);
                }
            }
        }
        evicted
    }

    fn entry_connects(
        &self,
        entry: &ZeroConfEntry,
        entries: &HashMap<Hash256, Arc<ZeroConfEntry>>,
    ) -> bool {
        for input in &entry.tx.vin {
            if entries.contains_key(&input.prevout.txid) {
                continue;
            }
            let Ok(Some(confirmed)) = self.confirmed_key(&input.prevout.txid) else {
                return false;
            };
            let txout_key = TxioKey::new(confirmed, input.prevout.index as u16);
            let Ok(Some(row)) = self.db.stored_txout(txout_key) else {
                return false;
            };
            match row.spent_by {
                None => {}
                Some(_) => return false,
            }
        }
        true
    }
}
