use crate::{read_json, write_json_atomic};
use ledger_core::{PeerStore, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PEERS_FILE: &str = "nodes.json";

/// Peer addresses as a JSON array of strings.
#[derive(Clone, Debug)]
pub struct JsonPeerStore {
    path: PathBuf,
}

impl JsonPeerStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(PEERS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PeerStore for JsonPeerStore {
    fn load_peers(&self) -> Result<Option<Vec<String>>, StoreError> {
        read_json(&self.path)
    }

    fn save_peers(&self, peers: &[String]) -> Result<(), StoreError> {
        write_json_atomic(&self.path, peers)?;
        debug!(peers = peers.len(), "peer list saved");
        Ok(())
    }
}
