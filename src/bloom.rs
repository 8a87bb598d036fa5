//! Probabilistic membership filter for flagged accounts and replay suppression.

use sha2::{Digest, Sha256};

/// Default filter width in bits.
pub const DEFAULT_FILTER_BITS: usize = 10_000;
/// Default number of hash positions per key.
pub const DEFAULT_HASH_COUNT: u32 = 3;

/// Fixed-width bloom filter over byte keys.
///
/// Membership tests report "possibly present": false positives happen,
/// false negatives never do. Hash positions are derived from SHA-256 over
/// `(key, seed)`, so a persisted filter indexes identically when reloaded
/// on another run or platform.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    words: Vec<u64>,
    bit_count: usize,
    hash_count: u32,
}

impl BloomFilter {
    pub fn new(bit_count: usize, hash_count: u32) -> Self {
        assert!(bit_count > 0, "filter width must be positive");
        assert!(hash_count > 0, "at least one hash position is required");
        Self {
            words: vec![0; bit_count.div_ceil(64)],
            bit_count,
            hash_count,
        }
    }

    fn position(&self, key: &[u8], seed: u32) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(seed.to_le_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(prefix) % self.bit_count as u64) as usize
    }

    pub fn insert(&mut self, key: &[u8]) {
        for seed in 0..self.hash_count {
            let index = self.position(key, seed);
            self.words[index / 64] |= 1 << (index % 64);
        }
    }

    /// True means "possibly present"; false is definitive.
    pub fn contains(&self, key: &[u8]) -> bool {
        (0..self.hash_count).all(|seed| {
            let index = self.position(key, seed);
            self.words[index / 64] & (1 << (index % 64)) != 0
        })
    }

    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Raw filter words for the snapshot codec.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Rebuild a filter from persisted words. Returns `None` when the word
    /// count does not match the declared width.
    pub fn from_words(words: Vec<u64>, bit_count: usize, hash_count: u32) -> Option<Self> {
        if bit_count == 0 || hash_count == 0 || words.len() != bit_count.div_ceil(64) {
            return None;
        }
        Some(Self {
            words,
            bit_count,
            hash_count,
        })
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_BITS, DEFAULT_HASH_COUNT)
    }
}
