#![allow(dead_code)]

use ledger_core::{genesis_block, pow::mine_block, Block, BlockTemplate};
use ledger_storage::sled_store::SledStore;
use rand::Rng;
use std::fs;
use tempfile::{tempdir, TempDir};

pub fn create_temp_dir() -> (TempDir, std::path::PathBuf) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (temp_dir, db_path)
}

pub fn remove_temp_dir(temp_dir: TempDir) {
    let db_path = temp_dir.path().to_path_buf();
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Temp directory should be removed");
}

pub fn create_temp_sled() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = SledStore::open(temp_dir.path().join("sled")).expect("Failed to open SledStore");
    (temp_dir, store)
}

/// Genesis plus `len - 1` blocks with random payloads at difficulty 1.
pub fn random_chain(len: usize) -> Vec<Block> {
    let mut rng = rand::thread_rng();
    let mut chain = vec![genesis_block()];
    while chain.len() < len {
        let payload: u64 = rng.gen();
        let template = BlockTemplate::next(chain.last().unwrap(), format!("payload-{payload:x}"), 1);
        chain.push(mine_block(template));
    }
    chain
}
