use stashd_params::{chain_params, hash256_from_hex, Network};
use stashd_primitives::block::{Block, BlockHeader, HEADER_SIZE};
use stashd_primitives::encoding::{from_bytes, to_bytes, WireError};
use stashd_primitives::outpoint::OutPoint;
use stashd_primitives::transaction::{Transaction, TxIn, TxOut};

fn sample_tx() -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint {
                txid: [0x11; 32],
                index: 3,
            },
            script_sig: vec![0x51, 0x52],
            sequence: u32::MAX,
        }],
        vout: vec![
            TxOut {
                value: 50_000,
                script_pubkey: vec![0x76, 0xa9, 0x14],
            },
            TxOut {
                value: 1_250,
                script_pubkey: vec![0x6a],
            },
        ],
        lock_time: 0,
    }
}

#[test]
fn transaction_round_trip() {
    let tx = sample_tx();
    let bytes = to_bytes(&tx);
    let decoded: Transaction = from_bytes(&bytes).expect("decode tx");
    assert_eq!(decoded, tx);
    assert_eq!(decoded.txid(), tx.txid());
}

#[test]
fn coinbase_detection() {
    let mut tx = sample_tx();
    assert!(!tx.is_coinbase());
    tx.vin = vec![TxIn {
        prevout: OutPoint::null(),
        script_sig: vec![0x01, 0x02],
        sequence: u32::MAX,
    }];
    assert!(tx.is_coinbase());
}

#[test]
fn header_is_80_bytes_and_round_trips() {
    let header = BlockHeader {
        version: 2,
        prev_block: [0xab; 32],
        merkle_root: [0xcd; 32],
        time: 1_500_000_000,
        bits: 0x1d00_ffff,
        nonce: 42,
    };
    let bytes = to_bytes(&header);
    assert_eq!(bytes.len(), HEADER_SIZE);
    let decoded: BlockHeader = from_bytes(&bytes).expect("decode header");
    assert_eq!(decoded, header);
    assert_eq!(decoded.hash(), header.hash());
}

#[test]
fn mainnet_genesis_header_hashes_to_genesis() {
    // The well-known genesis header fields; its hash must match the
    // configured network parameter.
    let params = chain_params(Network::Main);
    let header = BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root: params.genesis_tx_hash,
        time: 1_231_006_505,
        bits: 0x1d00_ffff,
        nonce: 2_083_236_893,
    };
    assert_eq!(header.hash(), params.genesis_hash);
    assert_eq!(
        header.hash(),
        hash256_from_hex("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f")
            .expect("genesis hex"),
    );
}

#[test]
fn block_round_trip() {
    let header = BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root: [0x44; 32],
        time: 1_600_000_000,
        bits: 0x207f_ffff,
        nonce: 7,
    };
    let block = Block {
        header,
        transactions: vec![sample_tx(), sample_tx()],
    };
    let bytes = to_bytes(&block);
    let decoded: Block = from_bytes(&bytes).expect("decode block");
    assert_eq!(decoded, block);
}

#[test]
fn truncated_block_fails() {
    let header = BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root: [0x44; 32],
        time: 1_600_000_000,
        bits: 0x207f_ffff,
        nonce: 7,
    };
    let block = Block {
        header,
        transactions: vec![sample_tx()],
    };
    let mut bytes = to_bytes(&block);
    bytes.truncate(bytes.len() - 3);
    let result: Result<Block, WireError> = from_bytes(&bytes);
    assert!(result.is_err());
}

#[test]
fn padded_block_fails() {
    let header = BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root: [0x44; 32],
        time: 1_600_000_000,
        bits: 0x207f_ffff,
        nonce: 7,
    };
    let block = Block {
        header,
        transactions: vec![sample_tx()],
    };
    let mut bytes = to_bytes(&block);
    bytes.push(0x00);
    let result: Result<Block, WireError> = from_bytes(&bytes);
    assert_eq!(result, Err(WireError::Trailing));
}
