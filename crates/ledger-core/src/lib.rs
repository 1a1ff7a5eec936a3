use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod chain;
pub mod constants;
pub mod error;
pub mod memory;
pub mod mine;
pub mod registry;
pub mod validate;

pub use chain::{genesis_block, ChainStore, Ledger};
pub use error::StoreError;
pub use registry::{NodeRegistry, PeerStore, RegistryError};
pub use validate::{is_valid, valid_prefix_len, validate, ValidationError};

use constants::MAX_DIFFICULTY;

pub type Hash = [u8; 32];

/// Current instant as an RFC 3339 UTC string. Stored verbatim in the block and
/// hashed as-is, so it must never be re-formatted after creation.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Difficulties above the maximum are clamped, never rejected.
pub fn clamp_difficulty(difficulty: u32) -> u32 {
    difficulty.min(MAX_DIFFICULTY)
}

/// A single record of the ledger. The JSON form (`prevHash` etc.) is the wire
/// and file format shared with peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub data: String,
    pub prev_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub difficulty: u32,
}

impl Block {
    /// Recomputes the hex digest from the block's own stored fields.
    pub fn compute_hash(&self) -> String {
        let hasher = prefix_hasher(self.index, &self.timestamp, &self.data, &self.prev_hash);
        hex::encode(finish_hash(hasher, self.nonce))
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Everything a block needs except the nonce and the resulting hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTemplate {
    pub index: u64,
    pub timestamp: String,
    pub data: String,
    pub prev_hash: String,
    pub difficulty: u32,
}

impl BlockTemplate {
    pub fn new(
        index: u64,
        timestamp: impl Into<String>,
        data: impl Into<String>,
        prev_hash: impl Into<String>,
        difficulty: u32,
    ) -> Self {
        Self {
            index,
            timestamp: timestamp.into(),
            data: data.into(),
            prev_hash: prev_hash.into(),
            difficulty: clamp_difficulty(difficulty),
        }
    }

    /// Template for the block following `tip`, stamped with the current time.
    pub fn next(tip: &Block, data: impl Into<String>, difficulty: u32) -> Self {
        Self::new(tip.index + 1, now_timestamp(), data, tip.hash.clone(), difficulty)
    }

    /// Hasher already fed with every field that precedes the nonce.
    pub fn hasher(&self) -> Sha256 {
        prefix_hasher(self.index, &self.timestamp, &self.data, &self.prev_hash)
    }

    pub fn digest(&self, nonce: u64) -> Hash {
        finish_hash(self.hasher(), nonce)
    }

    pub fn seal(self, nonce: u64, hash: Hash) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            data: self.data,
            prev_hash: self.prev_hash,
            hash: hex::encode(hash),
            nonce,
            difficulty: self.difficulty,
        }
    }
}

// Pre-image is the decimal index, timestamp, data, previous hash and decimal
// nonce concatenated without separators.
fn prefix_hasher(index: u64, timestamp: &str, data: &str, prev_hash: &str) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(data.as_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher
}

pub(crate) fn finish_hash(mut hasher: Sha256, nonce: u64) -> Hash {
    hasher.update(nonce.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

pub mod pow {
    use super::{finish_hash, Block, BlockTemplate, Hash};
    use crate::constants::PROGRESS_LOG_INTERVAL;
    use std::time::Instant;
    use tracing::{info, trace};

    /// Mines a block for the given fields. Never gives up.
    pub fn mine(
        index: u64,
        timestamp: &str,
        data: &str,
        prev_hash: &str,
        difficulty: u32,
    ) -> Block {
        mine_block(BlockTemplate::new(index, timestamp, data, prev_hash, difficulty))
    }

    /// Mine the block by incrementing the nonce from 0 until the hash has
    /// `difficulty` leading zero hex digits.
    pub fn mine_block(template: BlockTemplate) -> Block {
        let started = Instant::now();
        let base = template.hasher();
        let mut nonce = 0u64;
        loop {
            let hash = finish_hash(base.clone(), nonce);
            if meets_difficulty(&hash, template.difficulty) {
                log_solved(&template, nonce, &hash, started);
                return template.seal(nonce, hash);
            }
            nonce = nonce.wrapping_add(1);
            if nonce % PROGRESS_LOG_INTERVAL == 0 {
                trace!(index = template.index, nonce, "still mining");
            }
        }
    }

    fn log_solved(template: &BlockTemplate, nonce: u64, hash: &Hash, started: Instant) {
        info!(
            index = template.index,
            nonce,
            hash = %hex::encode(hash),
            elapsed = ?started.elapsed(),
            "mined block"
        );
    }

    /// One hex digit is four bits, so `difficulty` zero digits is
    /// `4 * difficulty` zero bits of the raw digest.
    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_bits(hash) >= difficulty * 4
    }

    /// Checks the hex form stored on a block.
    pub fn hex_meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let required = difficulty as usize;
        hash.len() >= required && hash.bytes().take(required).all(|c| c == b'0')
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{GENESIS_DATA, GENESIS_PREV_HASH, HASH_HEX_SIZE};

    fn fixed_template(difficulty: u32) -> BlockTemplate {
        BlockTemplate::new(1, "2024-01-01T00:00:00.000000000Z", "hello", "abc", difficulty)
    }

    #[test]
    fn leading_zero_bits_examples() {
        let mut h = [0u8; 32];
        assert_eq!(pow::count_leading_zero_bits(&h), 256);
        h[0] = 0x0F; // 00001111
        assert_eq!(pow::count_leading_zero_bits(&h), 4);
        h = [0u8; 32];
        h[1] = 0x80; // 00000000 10000000
        assert_eq!(pow::count_leading_zero_bits(&h), 8);
        h[1] = 0x40; // 01000000
        assert_eq!(pow::count_leading_zero_bits(&h), 9);
    }

    #[test]
    fn hash_preimage_concatenates_fields() {
        let block = fixed_template(0).seal(7, [0u8; 32]);
        let mut hasher = Sha256::new();
        hasher.update(b"12024-01-01T00:00:00.000000000Zhelloabc7");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(block.compute_hash(), expected);
        assert_eq!(block.compute_hash().len(), HASH_HEX_SIZE);
    }

    #[test]
    fn difficulty_is_not_hashed() {
        let mut block = pow::mine_block(fixed_template(1));
        let before = block.compute_hash();
        block.difficulty = 0;
        assert_eq!(block.compute_hash(), before);
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let template = fixed_template(0);
        assert_ne!(template.digest(0), template.digest(1));
    }

    #[test]
    fn mine_difficulty_zero_uses_nonce_zero() {
        let block = pow::mine(1, "2024-01-01T00:00:00Z", "payload", "prev", 0);
        assert_eq!(block.nonce, 0);
        assert!(block.has_valid_hash());
    }

    #[test]
    fn mine_meets_each_difficulty() {
        for difficulty in 1..=constants::MAX_DIFFICULTY {
            let block = pow::mine_block(fixed_template(difficulty));
            let prefix = "0".repeat(difficulty as usize);
            assert!(block.hash.starts_with(&prefix), "difficulty {difficulty}: {}", block.hash);
            assert!(block.has_valid_hash());
            assert_eq!(block.difficulty, difficulty);
        }
    }

    #[test]
    fn template_clamps_difficulty() {
        assert_eq!(fixed_template(9).difficulty, constants::MAX_DIFFICULTY);
        assert_eq!(clamp_difficulty(3), 3);
        assert_eq!(clamp_difficulty(u32::MAX), 5);
    }

    #[test]
    fn hex_difficulty_check() {
        assert!(pow::hex_meets_difficulty("00ab", 2));
        assert!(!pow::hex_meets_difficulty("0a0b", 2));
        assert!(pow::hex_meets_difficulty("anything", 0));
        assert!(!pow::hex_meets_difficulty("00", 3));
    }

    #[test]
    fn genesis_block_example() {
        let genesis = genesis_block();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.prev_hash, GENESIS_PREV_HASH);
        assert_eq!(genesis.data, GENESIS_DATA);
        assert_eq!(genesis.difficulty, 0);
        assert_eq!(genesis.nonce, 0);
        assert!(genesis.has_valid_hash());
    }

    #[test]
    fn block_serialization_uses_wire_names() -> anyhow::Result<()> {
        let block = fixed_template(0).seal(3, [1u8; 32]);
        let json = serde_json::to_value(&block)?;
        for key in ["index", "timestamp", "data", "prevHash", "hash", "nonce", "difficulty"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json.as_object().map(|o| o.len()), Some(7));
        let back: Block = serde_json::from_value(json)?;
        assert_eq!(back, block);

        let text = r#"{"index":1,"timestamp":"t","data":"d","prevHash":"p","hash":"h","nonce":9,"difficulty":2}"#;
        let parsed: Block = serde_json::from_str(text)?;
        assert_eq!(parsed.prev_hash, "p");
        assert_eq!(parsed.nonce, 9);
        Ok(())
    }

    #[test]
    fn tampering_breaks_hash() {
        let mut block = pow::mine_block(fixed_template(1));
        assert!(block.has_valid_hash());
        block.data.push('!');
        assert!(!block.has_valid_hash());
    }
}
