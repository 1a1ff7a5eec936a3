use crate::constants::{GENESIS_DATA, GENESIS_PREV_HASH};
use crate::error::StoreError;
use crate::mine::mine_parallel;
use crate::validate::{valid_prefix_len, validate};
use crate::{clamp_difficulty, now_timestamp, Block, BlockTemplate};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Persistence collaborator of the [`Ledger`]. Lives in `ledger-core` so the
/// storage crate can implement it without a circular dependency.
pub trait ChainStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load_chain(&self) -> Result<Option<Vec<Block>>, StoreError>;
    /// Replaces the persisted chain wholesale.
    fn save_chain(&self, blocks: &[Block]) -> Result<(), StoreError>;
    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Sole owner of the authoritative chain.
///
/// Every mutation holds the write lock across "swap in memory, then persist",
/// so readers never see a half-applied change and the persisted copy never
/// runs behind a published one except after a failed write. Published
/// sequences are never modified in place: [`Ledger::snapshot`] hands out the
/// current `Arc` and mutations install a new one.
pub struct Ledger<S: ChainStore + ?Sized = dyn ChainStore> {
    store: Arc<S>,
    chain: RwLock<Arc<Vec<Block>>>,
    /// Bumped under the write lock on every mutation; in-flight mining
    /// compares against it to notice a moved tip.
    generation: AtomicU64,
    durable: AtomicBool,
}

impl<S: ChainStore + ?Sized> Ledger<S> {
    /// Loads the persisted chain, repairing it if it fails validation, or
    /// starts a fresh genesis-only chain when nothing usable is stored.
    pub fn open(store: Arc<S>) -> Self {
        let ledger = Self {
            store,
            chain: RwLock::new(Arc::new(Vec::new())),
            generation: AtomicU64::new(0),
            durable: AtomicBool::new(true),
        };
        ledger.initialize();
        ledger
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn initialize(&self) {
        match self.store.load_chain() {
            Ok(Some(blocks)) if !blocks.is_empty() => {
                info!(blocks = blocks.len(), "loaded persisted chain");
                let invalid = validate(&blocks).err();
                *self.write() = Arc::new(blocks);
                match invalid {
                    None => info!("persisted chain is valid"),
                    Some(e) => {
                        warn!(error = %e, "persisted chain failed validation, repairing");
                        self.repair();
                    }
                }
            }
            Ok(_) => {
                info!("no persisted chain found, creating genesis block");
                self.reset_to_genesis();
            }
            Err(e) => {
                error!(error = %e, "failed to load persisted chain, creating genesis block");
                self.reset_to_genesis();
            }
        }
    }

    fn reset_to_genesis(&self) {
        let mut chain = self.write();
        self.commit(&mut chain, vec![genesis_block()]);
    }

    fn read(&self) -> RwLockReadGuard<'_, Arc<Vec<Block>>> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<Vec<Block>>> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `blocks` and persists them. Caller holds the write lock.
    fn commit(&self, chain: &mut RwLockWriteGuard<'_, Arc<Vec<Block>>>, blocks: Vec<Block>) {
        **chain = Arc::new(blocks);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.persist(chain.as_slice());
    }

    fn persist(&self, blocks: &[Block]) {
        match self.store.save_chain(blocks) {
            Ok(()) => self.durable.store(true, Ordering::Release),
            Err(e) => {
                self.durable.store(false, Ordering::Release);
                error!(
                    error = %e,
                    blocks = blocks.len(),
                    "failed to persist chain; in-memory state is ahead of durable state"
                );
            }
        }
    }

    /// Mines a block carrying `data` on top of the current tip and appends it.
    ///
    /// Mining runs without any lock held. If the tip moves meanwhile (another
    /// append or an adopted peer chain) the search is abandoned and restarted
    /// against the new tip, so a block is never committed with a stale
    /// previous hash.
    pub fn append(&self, data: impl Into<String>, difficulty: u32) -> Block {
        self.append_observed(data, difficulty, |_| {})
    }

    /// [`Ledger::append`] with `on_poll` invoked, with the 1-based attempt
    /// number, each time the miner checks whether the tip has moved.
    fn append_observed<F>(&self, data: impl Into<String>, difficulty: u32, on_poll: F) -> Block
    where
        F: Fn(u32) + Sync,
    {
        let data = data.into();
        let effective = clamp_difficulty(difficulty);
        if effective != difficulty {
            debug!(requested = difficulty, effective, "difficulty clamped");
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let (template, generation) = {
                let chain = self.read();
                let generation = self.generation.load(Ordering::Acquire);
                let template = match chain.last() {
                    Some(tip) => BlockTemplate::next(tip, data.clone(), effective),
                    None => BlockTemplate::new(0, now_timestamp(), data.clone(), GENESIS_PREV_HASH, effective),
                };
                (template, generation)
            };

            let tip_moved = self.tip_moved_since(generation);
            let Some(block) = mine_parallel(&template, || {
                on_poll(attempt);
                tip_moved()
            }) else {
                debug!(index = template.index, attempt, "chain tip moved while mining, restarting");
                continue;
            };

            let mut chain = self.write();
            if chain.last().map(|tip| tip.hash.as_str()) != Some(block.prev_hash.as_str()) {
                debug!(index = block.index, attempt, "chain tip moved before commit, restarting");
                continue;
            }
            let mut next = Vec::with_capacity(chain.len() + 1);
            next.extend_from_slice(chain.as_slice());
            next.push(block.clone());
            self.commit(&mut chain, next);
            info!(index = block.index, hash = %block.hash, "appended block");
            return block;
        }
    }

    /// Abort predicate for a search started at `generation`: true once any
    /// mutation has been committed since.
    fn tip_moved_since(&self, generation: u64) -> impl Fn() -> bool + Sync + '_ {
        move || self.generation.load(Ordering::Acquire) != generation
    }

    /// Immutable view of the whole chain as currently published.
    pub fn snapshot(&self) -> Arc<Vec<Block>> {
        Arc::clone(&self.read())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// (index, hash) of the last block.
    pub fn tip(&self) -> Option<(u64, String)> {
        self.read().last().map(|b| (b.index, b.hash.clone()))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// False after a persistence write failed, until the next one succeeds.
    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::Acquire)
    }

    /// Longest-valid-chain rule: adopt `candidate` only if it is valid and
    /// strictly longer than the local chain.
    pub fn replace_if_better(&self, candidate: Vec<Block>) -> bool {
        let local = self.len();
        if candidate.len() <= local {
            debug!(candidate = candidate.len(), local, "rejected candidate chain: not longer");
            return false;
        }
        if let Err(e) = validate(&candidate) {
            warn!(error = %e, candidate = candidate.len(), "rejected candidate chain: invalid");
            return false;
        }

        let mut chain = self.write();
        // Re-check: the local chain may have grown while we validated.
        if candidate.len() <= chain.len() {
            debug!(candidate = candidate.len(), local = chain.len(), "rejected candidate chain: not longer");
            return false;
        }
        info!(from = chain.len(), to = candidate.len(), "adopting longer valid chain");
        self.commit(&mut chain, candidate);
        true
    }

    /// Truncates the chain to its longest valid prefix and persists it.
    /// Returns the number of blocks dropped. A broken genesis block leaves no
    /// usable prefix, in which case a fresh genesis chain is installed.
    pub fn repair(&self) -> usize {
        let mut chain = self.write();
        let keep = valid_prefix_len(chain.as_slice());
        let dropped = chain.len() - keep;
        if dropped == 0 {
            info!("chain is valid, nothing to repair");
            return 0;
        }

        let repaired = if keep == 0 {
            warn!("genesis block is invalid, starting a fresh chain");
            vec![genesis_block()]
        } else {
            chain[..keep].to_vec()
        };
        warn!(dropped, kept = keep, "truncated chain to its longest valid prefix");
        self.commit(&mut chain, repaired);
        dropped
    }

    /// Final flush before the process exits.
    pub fn shutdown(&self) {
        let chain = self.read();
        self.persist(chain.as_slice());
        if let Err(e) = self.store.close() {
            error!(error = %e, "failed to close chain store");
        }
        info!(blocks = chain.len(), "ledger shut down");
    }
}

/// A genesis block: index 0, sentinel previous hash, difficulty 0.
pub fn genesis_block() -> Block {
    let template = BlockTemplate::new(0, now_timestamp(), GENESIS_DATA, GENESIS_PREV_HASH, 0);
    let hash = template.digest(0);
    template.seal(0, hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::{is_valid, pow};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use std::sync::Once;

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::open(Arc::new(MemoryStore::new()))
    }

    fn mined_chain(len: usize) -> Vec<Block> {
        let mut chain = vec![genesis_block()];
        while chain.len() < len {
            let template = BlockTemplate::next(chain.last().unwrap(), format!("block {}", chain.len()), 1);
            chain.push(pow::mine_block(template));
        }
        chain
    }

    #[test]
    fn open_empty_store_creates_and_persists_genesis() {
        let ledger = ledger();
        assert_eq!(ledger.len(), 1);
        let saved = ledger.store().saved().expect("genesis persisted");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].index, 0);
        assert_eq!(saved[0].prev_hash, GENESIS_PREV_HASH);
    }

    #[test]
    fn open_keeps_valid_persisted_chain() {
        let chain = mined_chain(4);
        let ledger = Ledger::open(Arc::new(MemoryStore::with_chain(chain.clone())));
        assert_eq!(*ledger.snapshot(), chain);
    }

    #[test]
    fn append_scenario_two_blocks() {
        let ledger = ledger();
        let a = ledger.append("a", 2);
        let b = ledger.append("b", 3);
        let chain = ledger.snapshot();
        assert_eq!(chain.len(), 3);
        assert!(a.hash.starts_with("00"));
        assert!(b.hash.starts_with("000"));
        assert_eq!(chain[1], a);
        assert_eq!(chain[2], b);
        assert!(is_valid(&chain));
    }

    #[test]
    fn sequential_appends_stay_valid_and_persisted() {
        let ledger = ledger();
        for i in 0..8 {
            ledger.append(format!("entry {i}"), i % 3);
        }
        let chain = ledger.snapshot();
        assert_eq!(chain.len(), 9);
        assert!(is_valid(&chain));
        assert_eq!(ledger.store().saved().unwrap(), *chain);
    }

    #[test]
    fn append_clamps_difficulty() {
        let ledger = ledger();
        let block = ledger.append("hard", 42);
        assert_eq!(block.difficulty, 5);
        assert!(block.hash.starts_with("00000"));
    }

    #[test]
    fn snapshot_is_not_affected_by_later_appends() {
        let ledger = ledger();
        let before = ledger.snapshot();
        ledger.append("later", 0);
        assert_eq!(before.len(), 1);
        assert_eq!(ledger.snapshot().len(), 2);
    }

    #[test]
    fn replace_rejects_equal_or_shorter() {
        let ledger = ledger();
        ledger.append("one", 0);
        ledger.append("two", 0);
        assert!(!ledger.replace_if_better(mined_chain(3)));
        assert!(!ledger.replace_if_better(mined_chain(2)));
        // Length is checked before validity.
        let mut broken = mined_chain(2);
        broken[1].data = "x".into();
        assert!(!ledger.replace_if_better(broken));
        assert_eq!(ledger.snapshot()[1].data, "one");
    }

    #[test]
    fn replace_rejects_longer_invalid() {
        let ledger = ledger();
        let mut candidate = mined_chain(5);
        candidate[2].data = "forged".into();
        assert!(!ledger.replace_if_better(candidate));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn replace_accepts_longer_valid_and_persists() {
        let ledger = ledger();
        let generation = ledger.generation();
        let candidate = mined_chain(4);
        assert!(ledger.replace_if_better(candidate.clone()));
        assert_eq!(*ledger.snapshot(), candidate);
        assert_eq!(ledger.store().saved().unwrap(), candidate);
        assert!(ledger.generation() > generation);
    }

    #[test]
    fn repair_truncates_at_tampered_block() {
        for k in 1..5 {
            let mut chain = mined_chain(6);
            chain[k].data = "tampered".into();
            let store = Arc::new(MemoryStore::with_chain(chain.clone()));
            let ledger = Ledger::open(store.clone());
            let repaired = ledger.snapshot();
            assert_eq!(repaired.len(), k);
            assert!(is_valid(&repaired));
            assert_eq!(repaired[..], chain[..k]);
            assert_eq!(store.saved().unwrap().len(), k);
        }
    }

    #[test]
    fn repair_reports_dropped_blocks() {
        let ledger = ledger();
        assert_eq!(ledger.repair(), 0);
        let mut chain = mined_chain(5);
        chain[3].hash = "ff".into();
        let ledger = Ledger::<MemoryStore> {
            store: Arc::new(MemoryStore::new()),
            chain: RwLock::new(Arc::new(chain)),
            generation: AtomicU64::new(0),
            durable: AtomicBool::new(true),
        };
        assert_eq!(ledger.repair(), 2);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn broken_genesis_is_replaced() {
        let mut chain = mined_chain(3);
        chain[0].data = "not genesis".into();
        let ledger = Ledger::open(Arc::new(MemoryStore::with_chain(chain)));
        let repaired = ledger.snapshot();
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].data, GENESIS_DATA);
    }

    #[test]
    fn unreadable_store_starts_fresh() {
        let store = Arc::new(MemoryStore::new());
        store.fail_loads(true);
        let ledger = Ledger::open(store);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn failed_write_keeps_memory_state() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone());
        assert!(ledger.is_durable());
        store.fail_writes(true);
        let block = ledger.append("volatile", 1);
        assert_eq!(ledger.snapshot().last(), Some(&block));
        assert!(!ledger.is_durable());
        assert_eq!(store.saved().unwrap().len(), 1);

        store.fail_writes(false);
        ledger.append("durable again", 0);
        assert!(ledger.is_durable());
        assert_eq!(store.saved().unwrap().len(), 3);
    }

    #[test]
    fn shutdown_flushes_chain() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone());
        store.fail_writes(true);
        ledger.append("pending", 0);
        store.fail_writes(false);
        ledger.shutdown();
        assert_eq!(store.saved().unwrap().len(), 2);
        assert!(store.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_serialized() {
        let ledger = Arc::new(ledger());
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::task::spawn_blocking(move || ledger.append(format!("concurrent {i}"), 2))
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let chain = ledger.snapshot();
        assert_eq!(chain.len(), 11);
        assert!(is_valid(&chain));
        for (i, block) in chain.iter().enumerate() {
            assert_eq!(block.index, i as u64);
        }
        let hashes: HashSet<_> = chain.iter().map(|b| b.hash.as_str()).collect();
        assert_eq!(hashes.len(), 11);
        let payloads: HashSet<_> = chain.iter().skip(1).map(|b| b.data.as_str()).collect();
        assert_eq!(payloads.len(), 10);
    }

    #[test]
    fn replacement_cancels_search_on_old_tip() {
        let ledger = ledger();
        let generation = ledger.generation();
        let genesis = ledger.snapshot()[0].clone();
        let tip_moved = ledger.tip_moved_since(generation);
        assert!(!tip_moved());

        assert!(ledger.replace_if_better(mined_chain(3)));
        assert!(tip_moved());
        // Difficulty 5 needs about a million hashes; the raised predicate
        // must end the search long before that.
        let stale = BlockTemplate::next(&genesis, "stale", 5);
        assert!(mine_parallel(&stale, &tip_moved).is_none());
    }

    #[test]
    fn append_restarts_on_tip_replaced_mid_search() {
        let ledger = ledger();
        let candidate = mined_chain(6);
        let swap = Once::new();
        let last_attempt = AtomicU32::new(0);
        let first_attempt_polls = AtomicU32::new(0);

        let block = ledger.append_observed("racing", 3, |attempt| {
            last_attempt.fetch_max(attempt, Ordering::SeqCst);
            if attempt == 1 {
                first_attempt_polls.fetch_add(1, Ordering::SeqCst);
                swap.call_once(|| assert!(ledger.replace_if_better(candidate.clone())));
            }
        });

        // The first search saw the swap on its first poll and was abandoned.
        assert_eq!(last_attempt.load(Ordering::SeqCst), 2);
        assert!(first_attempt_polls.load(Ordering::SeqCst) < 10_000);
        assert_eq!(block.index, 6);
        assert_eq!(block.prev_hash, candidate[5].hash);

        let chain = ledger.snapshot();
        assert_eq!(chain.len(), 7);
        assert_eq!(chain[..6], candidate[..]);
        assert_eq!(chain[6], block);
        assert!(is_valid(&chain));
    }
}
