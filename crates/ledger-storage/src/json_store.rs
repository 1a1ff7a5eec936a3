use crate::{read_json, write_json_atomic};
use ledger_core::{Block, ChainStore, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CHAIN_FILE: &str = "blockchain.json";

/// Keeps the whole chain in one indented JSON file, rewritten on every save.
#[derive(Clone, Debug)]
pub struct JsonChainStore {
    path: PathBuf,
}

impl JsonChainStore {
    /// Uses `<dir>/blockchain.json`, creating `dir` if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(CHAIN_FILE);
        info!(path = %path.display(), "json chain store opened");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChainStore for JsonChainStore {
    fn load_chain(&self) -> Result<Option<Vec<Block>>, StoreError> {
        read_json(&self.path)
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<(), StoreError> {
        write_json_atomic(&self.path, blocks)?;
        debug!(blocks = blocks.len(), path = %self.path.display(), "chain saved");
        Ok(())
    }
}
