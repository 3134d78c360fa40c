//! EVM logs bloom filter: a 2048-bit (256-byte) structure where a value is
//! added by setting 3 bits derived from its keccak256 digest. Used on the
//! realtime path to skip `eth_getLogs` entirely for blocks that provably
//! contain nothing any installed [`evindex_core::filter::LogFilter`] could
//! match.

use tiny_keccak::{Hasher, Keccak};

use evindex_core::filter::{AddressSet, LogFilter};

const BLOOM_BYTES: usize = 256;
const BLOOM_BITS: usize = BLOOM_BYTES * 8;

/// A parsed 2048-bit bloom filter, as found in a block header or receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bloom([u8; BLOOM_BYTES]);

impl Bloom {
    pub fn zero() -> Self {
        Self([0u8; BLOOM_BYTES])
    }

    /// Build from the raw 256-byte form (`RawBlock::logs_bloom`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != BLOOM_BYTES {
            return Err(format!("bloom must be {BLOOM_BYTES} bytes, got {}", bytes.len()));
        }
        let mut array = [0u8; BLOOM_BYTES];
        array.copy_from_slice(bytes);
        Ok(Self(array))
    }

    /// Parse a `0x`-prefixed hex string (the RPC wire shape of `logsBloom`).
    pub fn from_hex(hex: &str) -> Result<Self, String> {
        let trimmed = hex.strip_prefix("0x").unwrap_or(hex);
        if trimmed.len() != BLOOM_BYTES * 2 {
            return Err(format!("bloom must be {} hex chars, got {}", BLOOM_BYTES * 2, trimmed.len()));
        }
        let mut bytes = [0u8; BLOOM_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let start = i * 2;
            *byte = u8::from_str_radix(&trimmed[start..start + 2], 16).map_err(|e| e.to_string())?;
        }
        Ok(Self(bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Is every bit `value`'s digest would set already set in `self`? A
    /// `false` result means `value` is *definitely absent*; `true` means
    /// "maybe present" (false positives are possible, false negatives are
    /// not).
    pub fn might_contain(&self, value: &[u8]) -> bool {
        bit_positions(value).iter().all(|&bit| self.bit_is_set(bit))
    }

    fn bit_is_set(&self, bit: usize) -> bool {
        let byte_index = BLOOM_BYTES - 1 - bit / 8;
        let bit_index = bit % 8;
        self.0[byte_index] & (1 << bit_index) != 0
    }
}

/// keccak256(value), then 3 non-overlapping 16-bit pairs from the first 6
/// bytes of the digest, each masked to 11 bits, give 3 bit positions in
/// [0, 2047) — the standard EVM bloom add-to-filter derivation.
fn bit_positions(value: &[u8]) -> [usize; 3] {
    let mut hasher = Keccak::v256();
    hasher.update(value);
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);

    let mut positions = [0usize; 3];
    for (i, pos) in positions.iter_mut().enumerate() {
        let pair = u16::from_be_bytes([digest[i * 2], digest[i * 2 + 1]]);
        *pos = (pair & (BLOOM_BITS as u16 - 1)) as usize;
    }
    positions
}

/// Could `filter` possibly match something in a block whose bloom is
/// `bloom`? Only `LogFilter`s with a fixed, non-empty address set and
/// fully-specified topic0 can be checked this way — anything else (empty
/// address set, factory addresses, wildcard topics) is conservatively
/// "maybe", since the bloom can't rule it out.
pub fn log_filter_is_plausible(filter: &LogFilter, bloom: &Bloom) -> bool {
    if bloom.is_zero() {
        return false;
    }
    let AddressSet::Fixed(addresses) = &filter.addresses else {
        return true;
    };
    if addresses.is_empty() {
        return true;
    }
    let address_plausible = addresses.iter().any(|a| bloom.might_contain(&address_bytes(a)));
    if !address_plausible {
        return false;
    }
    match &filter.topics[0] {
        None => true,
        Some(values) => values.iter().any(|v| bloom.might_contain(&topic_bytes(v))),
    }
}

fn address_bytes(address: &str) -> Vec<u8> {
    hex_bytes(address)
}

fn topic_bytes(topic: &str) -> Vec<u8> {
    hex_bytes(topic)
}

fn hex_bytes(hex: &str) -> Vec<u8> {
    let trimmed = hex.strip_prefix("0x").unwrap_or(hex);
    let padded = if trimmed.len() % 2 == 1 { format!("0{trimmed}") } else { trimmed.to_string() };
    (0..padded.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&padded[i..i + 2], 16).ok())
        .collect()
}
