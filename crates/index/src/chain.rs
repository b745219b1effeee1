//! In-memory header graph and best-chain organization.
//!
//! Every header ever seen is kept, keyed by hash. `organize` recomputes the
//! best chain (greatest cumulative work reachable from the configured
//! genesis), assigns duplicate ids per height in first-seen order, and
//! reports how the tip moved so callers can undo/reapply around a reorg.

use std::collections::HashMap;

use stashd_params::Hash256;
use stashd_primitives::block::BlockHeader;

use crate::error::ChainError;

#[derive(Clone, Debug)]
pub struct HeaderRecord {
    pub header: BlockHeader,
    pub hash: Hash256,
    pub height: u32,
    pub dup: u8,
    pub main_branch: bool,
    pub num_tx: u32,
    pub file_num: u32,
    pub offset: u64,
    pub size: u32,
    seen_index: u64,
    connected: bool,
    cum_work: u128,
}

pub const DUP_UNASSIGNED: u8 = 0xff;
pub const FILE_UNKNOWN: u32 = u32::MAX;

impl HeaderRecord {
    fn new(hash: Hash256, header: BlockHeader, seen_index: u64) -> Self {
        Self {
            header,
            hash,
            height: 0,
            dup: DUP_UNASSIGNED,
            main_branch: false,
            num_tx: 0,
            file_num: FILE_UNKNOWN,
            offset: 0,
            size: 0,
            seen_index,
            connected: false,
            cum_work: 0,
        }
    }

    pub fn has_file_location(&self) -> bool {
        self.file_num != FILE_UNKNOWN
    }
}

/// Result of one `organize` pass.
#[derive(Clone, Debug)]
pub struct ReorganizationState {
    pub new_top: Option<Hash256>,
    pub prev_top: Option<Hash256>,
    pub has_new_top: bool,
    pub prev_top_still_valid: bool,
    pub reorg_branch_point: Option<Hash256>,
}

impl ReorganizationState {
    pub fn is_reorg(&self) -> bool {
        !self.prev_top_still_valid
    }
}

pub struct ChainStore {
    genesis: Hash256,
    headers: HashMap<Hash256, HeaderRecord>,
    main_chain: Vec<Hash256>,
    top: Option<Hash256>,
    next_seen: u64,
}

impl ChainStore {
    pub fn new(genesis: Hash256) -> Self {
        Self {
            genesis,
            headers: HashMap::new(),
            main_chain: Vec::new(),
            top: None,
            next_seen: 0,
        }
    }

    pub fn clear(&mut self) {
        self.headers.clear();
        self.main_chain.clear();
        self.top = None;
        self.next_seen = 0;
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Idempotent: re-adding a known hash leaves the existing record alone.
    pub fn add_block(&mut self, hash: Hash256, header: BlockHeader) -> bool {
        if self.headers.contains_key(&hash) {
            return false;
        }
        let record = HeaderRecord::new(hash, header, self.next_seen);
        self.next_seen += 1;
        self.headers.insert(hash, record);
        true
    }

    /// Re-admits a header persisted by an earlier run, keeping its
    /// duplicate id so stored rows keyed by it stay addressable.
    pub fn add_persisted_block(&mut self, hash: Hash256, header: BlockHeader, dup: u8) -> bool {
        if !self.add_block(hash, header) {
            return false;
        }
        if let Some(record) = self.headers.get_mut(&hash) {
            record.dup = dup;
        }
        true
    }

    pub fn has_header(&self, hash: &Hash256) -> bool {
        self.headers.contains_key(hash)
    }

    pub fn header(&self, hash: &Hash256) -> Option<&HeaderRecord> {
        self.headers.get(hash)
    }

    pub fn set_file_location(
        &mut self,
        hash: &Hash256,
        file_num: u32,
        offset: u64,
        size: u32,
        num_tx: u32,
    ) -> bool {
        match self.headers.get_mut(hash) {
            Some(record) => {
                record.file_num = file_num;
                record.offset = offset;
                record.size = size;
                record.num_tx = num_tx;
                true
            }
            None => false,
        }
    }

    pub fn top_hash(&self) -> Option<Hash256> {
        self.top
    }

    pub fn top_height(&self) -> u32 {
        self.main_chain.len().saturating_sub(1) as u32
    }

    pub fn main_chain_hash(&self, height: u32) -> Option<Hash256> {
        self.main_chain.get(height as usize).copied()
    }

    pub fn iter_headers(&self) -> impl Iterator<Item = &HeaderRecord> {
        self.headers.values()
    }

    /// Recomputes the best chain and per-height duplicate ids.
    pub fn organize(&mut self) -> ReorganizationState {
        let prev_top = self.top;

        let mut children: HashMap<Hash256, Vec<Hash256>> = HashMap::new();
        for record in self.headers.values() {
            children
                .entry(record.header.prev_block)
                .or_default()
                .push(record.hash);
        }
        for list in children.values_mut() {
            list.sort_by_key(|hash| self.headers[hash].seen_index);
        }

        for record in self.headers.values_mut() {
            record.connected = false;
        }

        // Heights and cumulative work, walking down from genesis. Headers
        // whose lineage does not reach genesis stay orphans.
        let mut best: Option<(u128, u8, u64, Hash256)> = None;
        if self.headers.contains_key(&self.genesis) {
            let mut stack = vec![(self.genesis, 0u32, 0u128)];
            while let Some((hash, height, parent_work)) = stack.pop() {
                let (cum_work, dup, seen_index) = {
                    let record = self.headers.get_mut(&hash).expect("reachable header");
                    record.height = height;
                    record.connected = true;
                    record.cum_work = parent_work.saturating_add(work_from_bits(record.header.bits));
                    (record.cum_work, record.dup, record.seen_index)
                };
                // Equal work ties break towards the earliest-registered
                // block: its persisted dup first, then in-memory order.
                let is_better = match best {
                    None => true,
                    Some((best_work, best_dup, best_seen, _)) => {
                        cum_work > best_work
                            || (cum_work == best_work
                                && (dup, seen_index) < (best_dup, best_seen))
                    }
                };
                if is_better {
                    best = Some((cum_work, dup, seen_index, hash));
                }
                if let Some(next) = children.get(&hash) {
                    for child in next {
                        stack.push((*child, height + 1, cum_work));
                    }
                }
            }
        }

        // Duplicate ids per height. An id assigned once (this run or a
        // previous one, via persisted headers) never changes; new blocks
        // take the lowest free id in first-seen order.
        let mut by_height: HashMap<u32, Vec<(u64, Hash256)>> = HashMap::new();
        for record in self.headers.values() {
            if record.connected {
                by_height
                    .entry(record.height)
                    .or_default()
                    .push((record.seen_index, record.hash));
            }
        }
        for peers in by_height.values_mut() {
            peers.sort();
            let mut used: Vec<u8> = peers
                .iter()
                .filter_map(|(_, hash)| {
                    let dup = self.headers[hash].dup;
                    (dup != DUP_UNASSIGNED).then_some(dup)
                })
                .collect();
            for (_, hash) in peers.iter() {
                let record = self.headers.get_mut(hash).expect("height peer");
                if record.dup != DUP_UNASSIGNED {
                    continue;
                }
                let mut dup = 0u8;
                while used.contains(&dup) {
                    dup += 1;
                }
                used.push(dup);
                record.dup = dup;
            }
        }

        for record in self.headers.values_mut() {
            record.main_branch = false;
        }
        self.main_chain.clear();
        let new_top = best.map(|(_, _, _, hash)| hash);
        if let Some(top_hash) = new_top {
            let mut cursor = top_hash;
            loop {
                let record = self.headers.get_mut(&cursor).expect("main chain header");
                record.main_branch = true;
                self.main_chain.push(cursor);
                if cursor == self.genesis {
                    break;
                }
                cursor = record.header.prev_block;
            }
            self.main_chain.reverse();
        }
        self.top = new_top;

        let prev_top_still_valid = match prev_top {
            Some(hash) => self
                .headers
                .get(&hash)
                .map(|record| record.main_branch)
                .unwrap_or(false),
            None => true,
        };
        let reorg_branch_point = if prev_top_still_valid {
            None
        } else {
            prev_top.and_then(|hash| self.branch_point_of(&hash))
        };

        ReorganizationState {
            new_top,
            prev_top,
            has_new_top: new_top != prev_top,
            prev_top_still_valid,
            reorg_branch_point,
        }
    }

    /// `organize` that refuses a best chain not rooted at the configured
    /// genesis. Used at startup, where a mismatch means the header table is
    /// corrupt or the block files belong to another network.
    pub fn force_organize(&mut self) -> Result<ReorganizationState, ChainError> {
        let state = self.organize();
        if !self.headers.is_empty() {
            match self.main_chain.first() {
                Some(root) if *root == self.genesis => {}
                _ => return Err(ChainError::Corruption("best chain does not reach genesis")),
            }
        }
        Ok(state)
    }

    /// Walks back from `hash` to the first main-branch ancestor. Used at
    /// startup to undo blocks that fell off the main chain while the
    /// process was down.
    pub fn find_reorg_point_from_block(&self, hash: &Hash256) -> Option<ReorganizationState> {
        let record = self.headers.get(hash)?;
        let still_valid = record.main_branch;
        let branch_point = if still_valid {
            None
        } else {
            self.branch_point_of(hash)
        };
        Some(ReorganizationState {
            new_top: self.top,
            prev_top: Some(*hash),
            has_new_top: self.top != Some(*hash),
            prev_top_still_valid: still_valid,
            reorg_branch_point: branch_point,
        })
    }

    fn branch_point_of(&self, hash: &Hash256) -> Option<Hash256> {
        let mut cursor = *hash;
        loop {
            let record = self.headers.get(&cursor)?;
            if record.main_branch {
                return Some(cursor);
            }
            cursor = record.header.prev_block;
        }
    }

    /// Hashes from `from` (inclusive) down to `branch_point` (exclusive),
    /// newest first.
    pub fn path_down_to(&self, from: &Hash256, branch_point: &Hash256) -> Vec<Hash256> {
        let mut path = Vec::new();
        let mut cursor = *from;
        while cursor != *branch_point {
            let Some(record) = self.headers.get(&cursor) else {
                break;
            };
            path.push(cursor);
            cursor = record.header.prev_block;
        }
        path
    }

    /// Main-chain hashes in `(after, to]`, oldest first.
    pub fn path_up_from(&self, after: &Hash256, to: &Hash256) -> Vec<Hash256> {
        let mut path = self.path_down_to(to, after);
        path.reverse();
        path
    }
}

/// Approximate per-header work `2^256 / (target + 1)` as a u128. Monotone
/// in difficulty, which is all tip selection needs.
pub fn work_from_bits(bits: u32) -> u128 {
    let exponent = (bits >> 24) as usize;
    let mantissa = (bits & 0x007f_ffff) as u128;
    if mantissa == 0 {
        return 0;
    }
    let shift = 8 * exponent.saturating_sub(3);
    if shift >= 256 {
        return 0;
    }
    let numerator_bits = 256 - shift;
    // q = 2^100 / mantissa, then scale by 2^(numerator_bits - 100).
    let q = (1u128 << 100) / mantissa;
    if numerator_bits >= 100 {
        let scale = (numerator_bits - 100) as u32;
        if scale >= q.leading_zeros() {
            u128::MAX
        } else {
            q << scale
        }
    } else {
        q >> (100 - numerator_bits) as u32
    }
}
