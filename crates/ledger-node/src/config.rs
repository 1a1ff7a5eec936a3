use crate::constants::{
    DEFAULT_DATA_DIR, DEFAULT_DIFFICULTY, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_PORT,
    DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_SYNC_INTERVAL_SECS, SLED_DIR,
};
use crate::sync::SyncConfig;
use clap::{Parser, ValueEnum};
use ledger_core::{ChainStore, StoreError};
use ledger_storage::{JsonChainStore, SledStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-node")]
#[command(about = "Proof-of-work ledger node with longest-chain peer sync")]
pub struct Args {
    /// Port to listen on; the node advertises itself as http://localhost:<port>
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the chain and peer files
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Chain persistence backend
    #[arg(long, value_enum, default_value_t = StoreKind::Json)]
    pub store: StoreKind,

    /// Leading zero hex digits required of appended blocks (clamped to 5)
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: u32,

    /// Seconds between peer synchronization cycles
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    pub sync_interval_secs: u64,

    /// Liveness probe timeout per peer, in milliseconds
    #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT_MS)]
    pub probe_timeout_ms: u64,

    /// Timeout for downloading a peer's chain, in seconds
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS)]
    pub fetch_timeout_secs: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Indented JSON file, rewritten on every change
    Json,
    /// sled database, one entry per block
    Sled,
}

/// Address under which a node on `port` registers itself.
pub fn self_address(port: u16) -> String {
    format!("http://localhost:{port}")
}

impl Args {
    pub fn self_addr(&self) -> String {
        self_address(self.port)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_secs(self.sync_interval_secs.max(1)),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn open_chain_store(&self) -> Result<Arc<dyn ChainStore>, StoreError> {
        Ok(match self.store {
            StoreKind::Json => Arc::new(JsonChainStore::open(&self.data_dir)?),
            StoreKind::Sled => Arc::new(SledStore::open(self.data_dir.join(SLED_DIR))?),
        })
    }
}
