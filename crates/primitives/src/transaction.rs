//! Transaction types and serialization.
//!
//! The engine ingests the standard pre-witness wire layout: version,
//! input list, output list, lock time. Consensus validation happens
//! upstream; this crate only frames and hashes.

use stashd_params::Hash256;

use crate::encoding::{to_bytes, WireDecode, WireEncode, WireError, WireRead, WireWrite};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl WireEncode for TxIn {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.prevout.encode_into(out);
        out.put_var_bytes(&self.script_sig);
        out.put_u32(self.sequence);
    }
}

impl WireDecode for TxIn {
    fn decode_from(input: &mut &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            prevout: OutPoint::decode_from(input)?,
            script_sig: input.take_var_bytes()?,
            sequence: input.take_u32()?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl WireEncode for TxOut {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.put_i64(self.value);
        out.put_var_bytes(&self.script_pubkey);
    }
}

impl WireDecode for TxOut {
    fn decode_from(input: &mut &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            value: input.take_i64()?,
            script_pubkey: input.take_var_bytes()?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&to_bytes(self))
    }
}

impl WireEncode for Transaction {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.put_i32(self.version);
        out.put_compact_size(self.vin.len() as u64);
        for input in &self.vin {
            input.encode_into(out);
        }
        out.put_compact_size(self.vout.len() as u64);
        for output in &self.vout {
            output.encode_into(out);
        }
        out.put_u32(self.lock_time);
    }
}

impl WireDecode for Transaction {
    fn decode_from(input: &mut &[u8]) -> Result<Self, WireError> {
        let version = input.take_i32()?;
        let vin_count = input.take_compact_size()? as usize;
        let mut vin = Vec::with_capacity(vin_count);
        for _ in 0..vin_count {
            vin.push(TxIn::decode_from(input)?);
        }
        let vout_count = input.take_compact_size()? as usize;
        let mut vout = Vec::with_capacity(vout_count);
        for _ in 0..vout_count {
            vout.push(TxOut::decode_from(input)?);
        }
        let lock_time = input.take_u32()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}
