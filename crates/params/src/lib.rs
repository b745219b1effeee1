//! Per-network chain parameters: magic bytes, genesis identifiers and
//! block-file naming for the upstream node's data directory.

pub type Hash256 = [u8; 32];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Main,
    Test,
    Unit,
}

impl Network {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Self::Main),
            "test" | "testnet" => Some(Self::Test),
            "unit" | "unittest" => Some(Self::Unit),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "Main",
            Self::Test => "Test",
            Self::Unit => "Unit",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub magic: [u8; 4],
    pub genesis_hash: Hash256,
    pub genesis_tx_hash: Hash256,
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Main => ChainParams {
            network,
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            genesis_hash: hash256_from_hex(
                "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            )
            .expect("mainnet genesis hash"),
            genesis_tx_hash: hash256_from_hex(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            )
            .expect("mainnet genesis tx hash"),
        },
        Network::Test => ChainParams {
            network,
            magic: [0x0b, 0x11, 0x09, 0x07],
            genesis_hash: hash256_from_hex(
                "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
            )
            .expect("testnet genesis hash"),
            genesis_tx_hash: hash256_from_hex(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            )
            .expect("testnet genesis tx hash"),
        },
        // Unit-test network: fixtures overwrite the genesis hash with the
        // first block they build.
        Network::Unit => ChainParams {
            network,
            magic: [0xfa, 0xbf, 0xb5, 0xda],
            genesis_hash: [0u8; 32],
            genesis_tx_hash: [0u8; 32],
        },
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "hex string is not 64 characters"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order (big-endian) hex hash into internal byte order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }
    let mut out = [0u8; 32];
    let bytes = hex.as_bytes();
    for i in 0..32 {
        let hi = hex_digit(bytes[i * 2]).ok_or(HexError::InvalidHex)?;
        let lo = hex_digit(bytes[i * 2 + 1]).ok_or(HexError::InvalidHex)?;
        // Display order is reversed relative to the wire order used
        // everywhere else in the engine.
        out[31 - i] = (hi << 4) | lo;
    }
    Ok(out)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((byte & 0x0f) as u32, 16).unwrap_or('0'));
    }
    out
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_network_names() {
        assert_eq!(Network::parse("Main"), Some(Network::Main));
        assert_eq!(Network::parse("testnet"), Some(Network::Test));
        assert_eq!(Network::parse("unit"), Some(Network::Unit));
        assert_eq!(Network::parse("simnet"), None);
    }

    #[test]
    fn hex_round_trip() {
        let display = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
        let hash = hash256_from_hex(display).expect("parse");
        assert_eq!(hash[31], 0x00);
        assert_eq!(hash[0], 0x6f);
        assert_eq!(hash256_to_hex(&hash), display);
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert_eq!(hash256_from_hex("abcd"), Err(HexError::InvalidLength));
        let bad = "zz".repeat(32);
        assert_eq!(hash256_from_hex(&bad), Err(HexError::InvalidHex));
    }

    #[test]
    fn networks_have_distinct_magic() {
        let main = chain_params(Network::Main);
        let test = chain_params(Network::Test);
        let unit = chain_params(Network::Unit);
        assert_ne!(main.magic, test.magic);
        assert_ne!(main.magic, unit.magic);
        assert_ne!(test.magic, unit.magic);
    }
}
