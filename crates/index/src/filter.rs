//! Tracked-script filter: which scripts the index maintains history for.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use stashd_storage::KeyValueStore;

use crate::db::IndexDb;
use crate::error::ChainError;

/// One registration request: the scripts of a wallet, whether they are
/// freshly generated (nothing historical to scan), and where their history
/// could start.
#[derive(Clone, Debug)]
pub struct RegistrationBatch {
    pub scripts: Vec<Vec<u8>>,
    pub wallet_id: String,
    pub is_new: bool,
    pub scan_from: u32,
}

pub struct AddressFilter<S> {
    db: IndexDb<S>,
    /// script -> height at which tracking began
    scripts: RwLock<HashMap<Vec<u8>, u32>>,
}

impl<S: KeyValueStore> AddressFilter<S> {
    pub fn new(db: IndexDb<S>) -> Self {
        Self {
            db,
            scripts: RwLock::new(HashMap::new()),
        }
    }

    /// Isolated snapshot used by side scans, so the main scanner's view
    /// is never disturbed mid-range.
    pub fn copy(&self) -> Self {
        let scripts = self.scripts.read().expect("filter lock").clone();
        Self {
            db: self.db.clone(),
            scripts: RwLock::new(scripts),
        }
    }

    /// Snapshot restricted to the given scripts.
    pub fn copy_restricted(&self, keep: &HashSet<Vec<u8>>) -> Self {
        let scripts = self
            .scripts
            .read()
            .expect("filter lock")
            .iter()
            .filter(|(script, _)| keep.contains(script.as_slice()))
            .map(|(script, height)| (script.clone(), *height))
            .collect();
        Self {
            db: self.db.clone(),
            scripts: RwLock::new(scripts),
        }
    }

    pub fn contains(&self, script: &[u8]) -> bool {
        self.scripts.read().expect("filter lock").contains_key(script)
    }

    pub fn len(&self) -> usize {
        self.scripts.read().expect("filter lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.read().expect("filter lock").is_empty()
    }

    pub fn tracked(&self) -> HashSet<Vec<u8>> {
        self.scripts
            .read()
            .expect("filter lock")
            .keys()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.scripts.write().expect("filter lock").clear();
    }

    /// Lowest height any tracked script still needs scanned from.
    pub fn scan_from(&self) -> Option<u32> {
        self.scripts
            .read()
            .expect("filter lock")
            .values()
            .copied()
            .min()
    }

    pub fn insert_scripts(&self, scripts: impl IntoIterator<Item = Vec<u8>>, height: u32) {
        let mut guard = self.scripts.write().expect("filter lock");
        for script in scripts {
            guard.entry(script).or_insert(height);
        }
    }

    /// Registers a batch. Duplicates within the batch are merged; scripts
    /// already tracked short-circuit. Fresh scripts of an existing wallet
    /// trigger a side scan over `[scan_from .. top]` against an isolated
    /// filter copy before they join the live set. Returns the `refresh`
    /// flag handed to the batch's completion callback.
    pub fn register_batch(
        &self,
        batch: &RegistrationBatch,
        top_height: u32,
        side_scan: impl FnOnce(&AddressFilter<S>, u32, u32) -> Result<(), ChainError>,
    ) -> Result<bool, ChainError> {
        let mut unique: HashSet<Vec<u8>> = HashSet::new();
        for script in &batch.scripts {
            unique.insert(script.clone());
        }
        let fresh: Vec<Vec<u8>> = {
            let guard = self.scripts.read().expect("filter lock");
            unique
                .into_iter()
                .filter(|script| !guard.contains_key(script.as_slice()))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(false);
        }

        if batch.is_new {
            // Freshly generated scripts cannot appear in history yet.
            self.insert_scripts(fresh, top_height.saturating_add(1));
            return Ok(false);
        }

        let scan_filter = {
            let isolated = AddressFilter::new(self.db.clone());
            isolated.insert_scripts(fresh.iter().cloned(), batch.scan_from);
            isolated
        };
        side_scan(&scan_filter, batch.scan_from, top_height)?;
        self.insert_scripts(fresh, batch.scan_from);
        Ok(true)
    }

    /// Drops the scripts from the filter and deletes their history rows.
    pub fn unregister(&self, scripts: &[Vec<u8>]) -> Result<(), ChainError> {
        {
            let mut guard = self.scripts.write().expect("filter lock");
            for script in scripts {
                guard.remove(script.as_slice());
            }
        }
        self.db.wipe_script_history(scripts)
    }

    pub fn db(&self) -> &IndexDb<S> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stashd_storage::memory::MemoryStore;

    fn filter() -> AddressFilter<MemoryStore> {
        AddressFilter::new(IndexDb::new(Arc::new(MemoryStore::new())))
    }

    fn batch(scripts: &[&[u8]], is_new: bool) -> RegistrationBatch {
        RegistrationBatch {
            scripts: scripts.iter().map(|s| s.to_vec()).collect(),
            wallet_id: "w1".to_string(),
            is_new,
            scan_from: 0,
        }
    }

    #[test]
    fn new_scripts_skip_the_side_scan() {
        let filter = filter();
        let refresh = filter
            .register_batch(&batch(&[b"s1", b"s2", b"s1"], true), 10, |_, _, _| {
                panic!("side scan must not run for new scripts")
            })
            .expect("register");
        assert!(!refresh);
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.scan_from(), Some(11));
    }

    #[test]
    fn existing_scripts_short_circuit() {
        let filter = filter();
        filter.insert_scripts([b"s1".to_vec()], 0);
        let mut scanned = false;
        let refresh = filter
            .register_batch(&batch(&[b"s1"], false), 10, |_, _, _| {
                scanned = true;
                Ok(())
            })
            .expect("register");
        assert!(!refresh);
        assert!(!scanned);
    }

    #[test]
    fn old_scripts_scan_on_an_isolated_copy() {
        let filter = filter();
        filter.insert_scripts([b"old".to_vec()], 0);
        let refresh = filter
            .register_batch(&batch(&[b"s1"], false), 42, |scan_filter, from, to| {
                assert_eq!((from, to), (0, 42));
                assert!(scan_filter.contains(b"s1"));
                assert!(!scan_filter.contains(b"old"));
                Ok(())
            })
            .expect("register");
        assert!(refresh);
        assert!(filter.contains(b"s1"));
    }

    #[test]
    fn unregister_removes_scripts() {
        let filter = filter();
        filter.insert_scripts([b"s1".to_vec(), b"s2".to_vec()], 0);
        filter.unregister(&[b"s1".to_vec()]).expect("unregister");
        assert!(!filter.contains(b"s1"));
        assert!(filter.contains(b"s2"));
    }
}
