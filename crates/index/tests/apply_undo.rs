use std::sync::Arc;

use stashd_index::chain::ChainStore;
use stashd_index::db::IndexDb;
use stashd_index::filter::AddressFilter;
use stashd_index::keys::{BlockKey, TxKey, TxioKey};
use stashd_index::writer::{BlockWriter, DbMode};
use stashd_primitives::block::{Block, BlockHeader};
use stashd_primitives::encoding::to_bytes;
use stashd_primitives::outpoint::OutPoint;
use stashd_primitives::transaction::{Transaction, TxIn, TxOut};
use stashd_storage::memory::MemoryStore;
use stashd_storage::{Column, KeyValueStore, WriteBatch};

fn p2pkh_script(tag: u8) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&[tag; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

fn make_tx(vin: Vec<TxIn>, vout: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 1,
        vin,
        vout,
        lock_time: 0,
    }
}

fn coinbase_tx(height: u32, script: Vec<u8>, value: i64) -> Transaction {
    make_tx(
        vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        vec![TxOut {
            value,
            script_pubkey: script,
        }],
    )
}

fn make_header(prev_block: [u8; 32], nonce: u32) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block,
        merkle_root: [0u8; 32],
        time: 1_700_000_000 + nonce,
        bits: 0x207f_ffff,
        nonce,
    }
}

struct Fixture {
    chain: ChainStore,
    db: IndexDb<MemoryStore>,
    writer: BlockWriter<MemoryStore>,
    filter: AddressFilter<MemoryStore>,
    next_offset: u64,
}

impl Fixture {
    fn new(genesis: &Block) -> Self {
        let store = Arc::new(MemoryStore::new());
        let db = IndexDb::new(Arc::clone(&store));
        let writer = BlockWriter::new(db.clone(), DbMode::Super);
        let filter = AddressFilter::new(db.clone());
        let mut chain = ChainStore::new(genesis.header.hash());
        chain.add_block(genesis.header.hash(), genesis.header);
        chain.organize();
        Self {
            chain,
            db,
            writer,
            filter,
            next_offset: 0,
        }
    }

    fn accept(&mut self, block: &Block) {
        let hash = block.header.hash();
        self.chain.add_block(hash, block.header);
        self.chain.organize();
        let payload = to_bytes(block);
        let mut batch = WriteBatch::new();
        self.writer
            .add_raw_block(&self.chain, 0, self.next_offset, &payload, true, &mut batch)
            .expect("add raw block");
        self.db.commit(&batch).expect("commit raw block");
        self.next_offset += 8 + payload.len() as u64;
    }

    fn apply(&self, height: u32) {
        let dup = self
            .db
            .valid_dup(height)
            .expect("valid dup")
            .expect("dup for height");
        assert!(self
            .writer
            .apply_block(height, dup, &self.filter)
            .expect("apply block"));
    }

    fn history_dump(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut rows = self
            .db
            .store()
            .scan_prefix(Column::Ssh, &[])
            .expect("ssh scan");
        rows.extend(
            self.db
                .store()
                .scan_prefix(Column::SubSsh, &[])
                .expect("sub ssh scan"),
        );
        rows
    }

    fn spent_dump(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.db
            .store()
            .scan_prefix(Column::TxOuts, &[])
            .expect("txout scan")
    }
}

#[test]
fn apply_credits_tracked_scripts() {
    let script_g = p2pkh_script(0x01);
    let script_a = p2pkh_script(0x11);

    let genesis = Block {
        header: make_header([0u8; 32], 0),
        transactions: vec![coinbase_tx(0, script_g.clone(), 50)],
    };
    let mut fixture = Fixture::new(&genesis);
    fixture.accept(&genesis);
    fixture.apply(0);

    let genesis_txid = genesis.transactions[0].txid();
    let fund = make_tx(
        vec![TxIn {
            prevout: OutPoint {
                txid: genesis_txid,
                index: 0,
            },
            script_sig: vec![0x01],
            sequence: u32::MAX,
        }],
        vec![
            TxOut {
                value: 30,
                script_pubkey: script_a.clone(),
            },
            TxOut {
                value: 20,
                script_pubkey: script_g.clone(),
            },
        ],
    );
    let block1 = Block {
        header: make_header(genesis.header.hash(), 1),
        transactions: vec![coinbase_tx(1, p2pkh_script(0x02), 50), fund],
    };
    fixture.accept(&block1);
    fixture.apply(1);

    let totals_a = fixture
        .db
        .script_history(&script_a)
        .expect("ssh read")
        .expect("script a history");
    assert_eq!(totals_a.balance, 30);
    assert_eq!(totals_a.total_received, 30);
    assert_eq!(totals_a.txio_count, 1);

    // script_g funded 50 at genesis, spent 50, got 20 change back.
    let totals_g = fixture
        .db
        .script_history(&script_g)
        .expect("ssh read")
        .expect("script g history");
    assert_eq!(totals_g.balance, 20);
    assert_eq!(totals_g.total_received, 70);
    assert_eq!(totals_g.txio_count, 3);

    // The genesis coinbase output carries the spender's input key.
    let genesis_out = fixture
        .db
        .stored_txout(TxioKey::new(TxKey::new(0, 0, 0), 0))
        .expect("txout read")
        .expect("genesis output");
    assert_eq!(
        genesis_out.spent_by,
        Some(TxioKey::new(TxKey::new(1, 0, 1), 0))
    );

    // Change back to the funding script is flagged from-self.
    let sub = fixture
        .db
        .sub_history(&script_g, BlockKey::new(1, 0))
        .expect("sub read")
        .expect("sub history");
    let change_pair = sub.txios[&TxioKey::new(TxKey::new(1, 0, 1), 1)];
    assert!(change_pair.from_self);
}

#[test]
fn reapplying_a_block_is_a_no_op() {
    let script_g = p2pkh_script(0x01);
    let genesis = Block {
        header: make_header([0u8; 32], 0),
        transactions: vec![coinbase_tx(0, script_g.clone(), 50)],
    };
    let mut fixture = Fixture::new(&genesis);
    fixture.accept(&genesis);
    fixture.apply(0);

    let applied_again = fixture
        .writer
        .apply_block(0, 0, &fixture.filter)
        .expect("reapply");
    assert!(!applied_again);
    let totals = fixture
        .db
        .script_history(&script_g)
        .expect("ssh read")
        .expect("history");
    assert_eq!(totals.balance, 50);
    assert_eq!(totals.txio_count, 1);
}

#[test]
fn undo_restores_history_byte_for_byte() {
    let script_g = p2pkh_script(0x01);
    let script_a = p2pkh_script(0x11);
    let script_b = p2pkh_script(0x22);

    let genesis = Block {
        header: make_header([0u8; 32], 0),
        transactions: vec![coinbase_tx(0, script_g.clone(), 50)],
    };
    let mut fixture = Fixture::new(&genesis);
    fixture.accept(&genesis);
    fixture.apply(0);

    let fund = make_tx(
        vec![TxIn {
            prevout: OutPoint {
                txid: genesis.transactions[0].txid(),
                index: 0,
            },
            script_sig: vec![0x01],
            sequence: u32::MAX,
        }],
        vec![TxOut {
            value: 30,
            script_pubkey: script_a.clone(),
        }],
    );
    let block1 = Block {
        header: make_header(genesis.header.hash(), 1),
        transactions: vec![coinbase_tx(1, p2pkh_script(0x02), 50), fund.clone()],
    };
    fixture.accept(&block1);
    fixture.apply(1);

    let history_before = fixture.history_dump();
    let spent_before = fixture.spent_dump();

    let spend = make_tx(
        vec![TxIn {
            prevout: OutPoint {
                txid: fund.txid(),
                index: 0,
            },
            script_sig: vec![0x02],
            sequence: u32::MAX,
        }],
        vec![TxOut {
            value: 30,
            script_pubkey: script_b.clone(),
        }],
    );
    let block2 = Block {
        header: make_header(block1.header.hash(), 2),
        transactions: vec![coinbase_tx(2, p2pkh_script(0x03), 50), spend],
    };
    fixture.accept(&block2);
    fixture.apply(2);

    assert_eq!(
        fixture
            .db
            .script_history(&script_a)
            .expect("ssh read")
            .expect("history")
            .balance,
        0
    );
    assert!(fixture
        .db
        .script_history(&script_b)
        .expect("ssh read")
        .is_some());

    let undo = fixture
        .db
        .undo_record(2, 0)
        .expect("undo read")
        .expect("undo record");
    fixture
        .writer
        .undo_block(&undo, &fixture.filter)
        .expect("undo block");

    // Spec'd round trip: totals, sub-histories and spent flags all return
    // to their pre-apply bytes. block2's raw rows remain, its history
    // contribution does not.
    let totals_a = fixture
        .db
        .script_history(&script_a)
        .expect("ssh read")
        .expect("history");
    assert_eq!(totals_a.balance, 30);
    let fund_out = fixture
        .db
        .stored_txout(TxioKey::new(TxKey::new(1, 0, 1), 0))
        .expect("txout read")
        .expect("funded output");
    assert_eq!(fund_out.spent_by, None);
    assert!(fixture
        .db
        .script_history(&script_b)
        .expect("ssh read")
        .is_none());

    let history_after = fixture.history_dump();
    assert_eq!(history_after, history_before);

    // block2's coinbase rows are extra; every row that existed before
    // apply is back to its old bytes.
    let spent_after = fixture.spent_dump();
    for row in &spent_before {
        assert!(spent_after.contains(row), "row changed by apply+undo");
    }

    // The stored block row is no longer flagged applied.
    let header2 = fixture
        .db
        .stored_header(2, 0)
        .expect("header read")
        .expect("stored header");
    assert!(!header2.applied);
    assert_eq!(fixture.db.sync_info().expect("sync info").applied_to_hgt, 1);
}

#[test]
fn intra_block_spend_applies_and_undoes() {
    let script_g = p2pkh_script(0x01);
    let script_a = p2pkh_script(0x11);
    let script_b = p2pkh_script(0x22);

    let genesis = Block {
        header: make_header([0u8; 32], 0),
        transactions: vec![coinbase_tx(0, script_g.clone(), 50)],
    };
    let mut fixture = Fixture::new(&genesis);
    fixture.accept(&genesis);
    fixture.apply(0);

    // block 1: fund pays script_a, relay immediately spends it to
    // script_b within the same block.
    let fund = make_tx(
        vec![TxIn {
            prevout: OutPoint {
                txid: genesis.transactions[0].txid(),
                index: 0,
            },
            script_sig: vec![0x01],
            sequence: u32::MAX,
        }],
        vec![TxOut {
            value: 30,
            script_pubkey: script_a.clone(),
        }],
    );
    let relay = make_tx(
        vec![TxIn {
            prevout: OutPoint {
                txid: fund.txid(),
                index: 0,
            },
            script_sig: vec![0x02],
            sequence: u32::MAX,
        }],
        vec![TxOut {
            value: 30,
            script_pubkey: script_b.clone(),
        }],
    );
    let block1 = Block {
        header: make_header(genesis.header.hash(), 1),
        transactions: vec![coinbase_tx(1, p2pkh_script(0x02), 50), fund, relay],
    };
    fixture.accept(&block1);
    fixture.apply(1);

    let totals_a = fixture
        .db
        .script_history(&script_a)
        .expect("ssh read")
        .expect("history a");
    assert_eq!(totals_a.balance, 0);
    assert_eq!(totals_a.total_received, 30);
    assert_eq!(totals_a.txio_count, 1);
    let totals_b = fixture
        .db
        .script_history(&script_b)
        .expect("ssh read")
        .expect("history b");
    assert_eq!(totals_b.balance, 30);

    // One merged pair holding both sides.
    let sub_a = fixture
        .db
        .sub_history(&script_a, BlockKey::new(1, 0))
        .expect("sub read")
        .expect("sub a");
    assert_eq!(sub_a.txios.len(), 1);
    let pair = sub_a.txios[&TxioKey::new(TxKey::new(1, 0, 1), 0)];
    assert_eq!(pair.txin_key, Some(TxioKey::new(TxKey::new(1, 0, 2), 0)));

    let undo = fixture
        .db
        .undo_record(1, 0)
        .expect("undo read")
        .expect("undo record");
    fixture
        .writer
        .undo_block(&undo, &fixture.filter)
        .expect("undo");

    assert!(fixture
        .db
        .script_history(&script_a)
        .expect("ssh read")
        .is_none());
    assert!(fixture
        .db
        .script_history(&script_b)
        .expect("ssh read")
        .is_none());
    let totals_g = fixture
        .db
        .script_history(&script_g)
        .expect("ssh read")
        .expect("history g");
    assert_eq!(totals_g.balance, 50);
}
