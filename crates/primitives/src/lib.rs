//! Wire-format primitives: hashing, serialization, transactions and blocks.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use stashd_params::Hash256;
