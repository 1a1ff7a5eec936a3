//! Hash-chain integrity checks. Everything here is pure and never mutates
//! the chain it is given.

use crate::constants::GENESIS_PREV_HASH;
use crate::pow::hex_meets_difficulty;
use crate::Block;
use thiserror::Error;

/// First integrity violation found in a chain. `position` is the offset in
/// the sequence, so everything before it forms a valid prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("block at position {position} is not a genesis block")]
    BadGenesis { position: usize },
    #[error("block at position {position} has index {found}, expected {expected}")]
    IndexGap {
        position: usize,
        expected: u64,
        found: u64,
    },
    #[error("block at position {position} does not reference the hash of its predecessor")]
    BrokenLink { position: usize },
    #[error("block at position {position} has a hash that does not match its contents")]
    HashMismatch { position: usize },
    #[error("block at position {position} lacks {difficulty} leading zero hex digits")]
    InsufficientWork { position: usize, difficulty: u32 },
}

impl ValidationError {
    pub fn position(&self) -> usize {
        match self {
            ValidationError::BadGenesis { position }
            | ValidationError::IndexGap { position, .. }
            | ValidationError::BrokenLink { position }
            | ValidationError::HashMismatch { position }
            | ValidationError::InsufficientWork { position, .. } => *position,
        }
    }
}

/// Single pass over the chain. An empty chain is vacuously valid; a lone
/// genesis block is valid when its stored hash matches its contents.
pub fn validate(chain: &[Block]) -> Result<(), ValidationError> {
    let Some(genesis) = chain.first() else {
        return Ok(());
    };
    if genesis.index != 0 || genesis.prev_hash != GENESIS_PREV_HASH || genesis.difficulty != 0 {
        return Err(ValidationError::BadGenesis { position: 0 });
    }
    check_block(0, genesis)?;

    for (offset, pair) in chain.windows(2).enumerate() {
        let position = offset + 1;
        let (prev, current) = (&pair[0], &pair[1]);
        if current.index != prev.index + 1 {
            return Err(ValidationError::IndexGap {
                position,
                expected: prev.index + 1,
                found: current.index,
            });
        }
        if current.prev_hash != prev.hash {
            return Err(ValidationError::BrokenLink { position });
        }
        check_block(position, current)?;
    }
    Ok(())
}

pub fn is_valid(chain: &[Block]) -> bool {
    validate(chain).is_ok()
}

/// Length of the longest prefix, starting at genesis, that passes
/// [`validate`]. Zero when genesis itself is broken.
pub fn valid_prefix_len(chain: &[Block]) -> usize {
    match validate(chain) {
        Ok(()) => chain.len(),
        Err(e) => e.position(),
    }
}

fn check_block(position: usize, block: &Block) -> Result<(), ValidationError> {
    if !block.has_valid_hash() {
        return Err(ValidationError::HashMismatch { position });
    }
    if !hex_meets_difficulty(&block.hash, block.difficulty) {
        return Err(ValidationError::InsufficientWork {
            position,
            difficulty: block.difficulty,
        });
    }
    Ok(())
}
