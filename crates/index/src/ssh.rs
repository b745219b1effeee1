//! Stored script history: per-script totals plus height-sharded txio pairs.
//!
//! The totals row lives in the `Ssh` column keyed by the canonical script
//! bytes; each sub-history lives in `SubSsh` keyed by `script ++ block key`,
//! so a script's full history is one prefix range and never has to be
//! materialized at once.

use std::collections::BTreeMap;

use stashd_primitives::encoding::{WireError, WireRead, WireWrite};

use crate::keys::TxioKey;

/// Totals row for one script.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScriptHistory {
    pub balance: i64,
    pub total_received: u64,
    pub txio_count: u32,
}

impl ScriptHistory {
    pub fn is_empty(&self) -> bool {
        self.balance == 0 && self.total_received == 0 && self.txio_count == 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.put_i64(self.balance);
        out.put_u64(self.total_received);
        out.put_u32(self.txio_count);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut input = bytes;
        let totals = Self {
            balance: input.take_i64()?,
            total_received: input.take_u64()?,
            txio_count: input.take_u32()?,
        };
        if !input.is_empty() {
            return Err(WireError::Trailing);
        }
        Ok(totals)
    }
}

/// One output and, once spent, the input that consumed it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxIoPair {
    pub txout_key: TxioKey,
    pub txin_key: Option<TxioKey>,
    pub value: i64,
    pub is_coinbase: bool,
    pub from_self: bool,
    pub main_branch: bool,
}

const TXIO_FLAG_SPENT: u8 = 1 << 0;
const TXIO_FLAG_COINBASE: u8 = 1 << 1;
const TXIO_FLAG_FROM_SELF: u8 = 1 << 2;
const TXIO_FLAG_MAIN: u8 = 1 << 3;

impl TxIoPair {
    pub fn unspent(txout_key: TxioKey, value: i64, is_coinbase: bool) -> Self {
        Self {
            txout_key,
            txin_key: None,
            value,
            is_coinbase,
            from_self: false,
            main_branch: true,
        }
    }
}

/// Height-sharded slice of a script's history.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubHistory {
    pub txios: BTreeMap<TxioKey, TxIoPair>,
}

impl SubHistory {
    pub fn is_empty(&self) -> bool {
        self.txios.is_empty()
    }

    pub fn insert(&mut self, pair: TxIoPair) {
        self.txios.insert(pair.txout_key, pair);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.txios.len() * 26 + 4);
        out.put_compact_size(self.txios.len() as u64);
        for pair in self.txios.values() {
            out.put_slice(pair.txout_key.as_bytes());
            let mut flags = 0u8;
            if pair.txin_key.is_some() {
                flags |= TXIO_FLAG_SPENT;
            }
            if pair.is_coinbase {
                flags |= TXIO_FLAG_COINBASE;
            }
            if pair.from_self {
                flags |= TXIO_FLAG_FROM_SELF;
            }
            if pair.main_branch {
                flags |= TXIO_FLAG_MAIN;
            }
            out.put_u8(flags);
            if let Some(txin) = &pair.txin_key {
                out.put_slice(txin.as_bytes());
            }
            out.put_i64(pair.value);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut input = bytes;
        let count = input.take_compact_size()?;
        let mut txios = BTreeMap::new();
        for _ in 0..count {
            let raw = input.take_array::<8>()?;
            let txout_key =
                TxioKey::from_slice(&raw).ok_or(WireError::BadData("txout key"))?;
            let flags = input.take_u8()?;
            let txin_key = if flags & TXIO_FLAG_SPENT != 0 {
                let raw = input.take_array::<8>()?;
                Some(TxioKey::from_slice(&raw).ok_or(WireError::BadData("txin key"))?)
            } else {
                None
            };
            let value = input.take_i64()?;
            txios.insert(
                txout_key,
                TxIoPair {
                    txout_key,
                    txin_key,
                    value,
                    is_coinbase: flags & TXIO_FLAG_COINBASE != 0,
                    from_self: flags & TXIO_FLAG_FROM_SELF != 0,
                    main_branch: flags & TXIO_FLAG_MAIN != 0,
                },
            );
        }
        if !input.is_empty() {
            return Err(WireError::Trailing);
        }
        Ok(Self { txios })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::TxKey;

    #[test]
    fn totals_round_trip() {
        let totals = ScriptHistory {
            balance: 90,
            total_received: 140,
            txio_count: 3,
        };
        assert_eq!(
            ScriptHistory::decode(&totals.encode()).expect("decode"),
            totals
        );
        assert!(!totals.is_empty());
        assert!(ScriptHistory::default().is_empty());
    }

    #[test]
    fn sub_history_round_trip() {
        let mut sub = SubHistory::default();
        let out_a = TxioKey::new(TxKey::new(10, 0, 1), 0);
        let out_b = TxioKey::new(TxKey::new(10, 0, 2), 1);
        sub.insert(TxIoPair::unspent(out_a, 500, true));
        sub.insert(TxIoPair {
            txout_key: out_b,
            txin_key: Some(TxioKey::new(TxKey::new(12, 0, 0), 0)),
            value: 250,
            is_coinbase: false,
            from_self: true,
            main_branch: true,
        });
        let decoded = SubHistory::decode(&sub.encode()).expect("decode");
        assert_eq!(decoded, sub);
    }

    #[test]
    fn insert_overwrites_same_output() {
        let mut sub = SubHistory::default();
        let out = TxioKey::new(TxKey::new(10, 0, 1), 0);
        sub.insert(TxIoPair::unspent(out, 500, false));
        let mut spent = TxIoPair::unspent(out, 500, false);
        spent.txin_key = Some(TxioKey::new(TxKey::new(10, 0, 2), 0));
        sub.insert(spent);
        assert_eq!(sub.txios.len(), 1);
        assert!(sub.txios[&out].txin_key.is_some());
    }
}
