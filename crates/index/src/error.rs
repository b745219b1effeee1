use stashd_params::{hash256_to_hex, Hash256};
use stashd_primitives::encoding::WireError;
use stashd_storage::StoreError;

#[derive(Debug)]
pub enum ChainError {
    /// Header graph does not resolve to the configured genesis.
    Corruption(&'static str),
    /// A block body failed to deserialize; the header itself was valid and
    /// the hash has been queued for re-fetch.
    BlockTxData(Hash256),
    Decode(WireError),
    Store(StoreError),
    NotFound(&'static str),
    /// Startup configuration does not match the on-disk data.
    ConfigMismatch(&'static str),
    InvalidKey(&'static str),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Corruption(message) => write!(f, "header corruption: {message}"),
            ChainError::BlockTxData(hash) => {
                write!(f, "undeserializable block body {}", hash256_to_hex(hash))
            }
            ChainError::Decode(err) => write!(f, "{err}"),
            ChainError::Store(err) => write!(f, "{err}"),
            ChainError::NotFound(what) => write!(f, "{what} not found"),
            ChainError::ConfigMismatch(message) => write!(f, "configuration mismatch: {message}"),
            ChainError::InvalidKey(message) => write!(f, "invalid key: {message}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<WireError> for ChainError {
    fn from(err: WireError) -> Self {
        ChainError::Decode(err)
    }
}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        ChainError::Store(err)
    }
}
