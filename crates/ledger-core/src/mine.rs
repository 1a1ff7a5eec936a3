use crate::{finish_hash, pow::meets_difficulty, Block, BlockTemplate};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

/// Mines `template` by searching nonces in parallel until a hash has the
/// template's number of leading zero hex digits.
///
/// `find_first` keeps the result identical to the sequential search: the
/// smallest solving nonce wins, so difficulty 0 always yields nonce 0.
/// `should_abort` is polled for every candidate; once it reports true the
/// search winds down and `None` is returned unless a solution was already in
/// hand.
pub fn mine_parallel<F>(template: &BlockTemplate, should_abort: F) -> Option<Block>
where
    F: Fn() -> bool + Sync,
{
    let started = Instant::now();
    let base = template.hasher();
    let difficulty = template.difficulty;

    let candidate = (0u64..u64::MAX).into_par_iter().find_first(|nonce| {
        should_abort() || meets_difficulty(&finish_hash(base.clone(), *nonce), difficulty)
    })?;

    // The abort short-circuit also matches, so re-check the winner.
    let hash = finish_hash(base, candidate);
    if !meets_difficulty(&hash, difficulty) {
        debug!(index = template.index, "parallel mining aborted");
        return None;
    }

    info!(
        index = template.index,
        nonce = candidate,
        hash = %hex::encode(hash),
        elapsed = ?started.elapsed(),
        "mined block"
    );
    Some(template.clone().seal(candidate, hash))
}
