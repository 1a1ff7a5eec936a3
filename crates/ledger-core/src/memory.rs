//! In-memory stores for tests and ephemeral nodes. Failure switches let
//! callers exercise the "write failed, keep going" paths.

use crate::chain::ChainStore;
use crate::error::StoreError;
use crate::registry::PeerStore;
use crate::Block;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
pub struct MemoryStore {
    blocks: Mutex<Option<Vec<Block>>>,
    fail_loads: AtomicBool,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Mutex::new(Some(blocks)),
            ..Self::default()
        }
    }

    /// Last successfully saved chain.
    pub fn saved(&self) -> Option<Vec<Block>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ChainStore for MemoryStore {
    fn load_chain(&self) -> Result<Option<Vec<Block>>, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "simulated load failure").into());
        }
        Ok(self.saved())
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated write failure").into());
        }
        *self.blocks.lock().unwrap_or_else(PoisonError::into_inner) = Some(blocks.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPeerStore {
    peers: Mutex<Option<Vec<String>>>,
    fail_loads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers<I, T>(peers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            peers: Mutex::new(Some(peers.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Option<Vec<String>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl PeerStore for MemoryPeerStore {
    fn load_peers(&self) -> Result<Option<Vec<String>>, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "simulated load failure").into());
        }
        Ok(self.saved())
    }

    fn save_peers(&self, peers: &[String]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated write failure").into());
        }
        *self.peers.lock().unwrap_or_else(PoisonError::into_inner) = Some(peers.to_vec());
        Ok(())
    }
}
