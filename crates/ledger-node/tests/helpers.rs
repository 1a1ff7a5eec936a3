#![allow(dead_code)]

use axum::Router;
use ledger_core::memory::{MemoryPeerStore, MemoryStore};
use ledger_core::{genesis_block, pow::mine_block, Block, BlockTemplate, ChainStore, Ledger, NodeRegistry, PeerStore};
use ledger_node::{router, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;

pub const SELF_ADDR: &str = "http://localhost:8080";

pub fn state_for(self_addr: &str, difficulty: u32) -> AppState {
    let chain_store: Arc<dyn ChainStore> = Arc::new(MemoryStore::new());
    let peer_store: Arc<dyn PeerStore> = Arc::new(MemoryPeerStore::new());
    AppState {
        ledger: Arc::new(Ledger::open(chain_store)),
        registry: Arc::new(NodeRegistry::open(self_addr, peer_store)),
        difficulty,
    }
}

/// Serves `app` on an ephemeral loopback port and returns its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    format!("http://{addr}")
}

/// Starts a full node on an ephemeral port; its registry knows it by the
/// address it is actually reachable on.
pub async fn spawn_node(difficulty: u32) -> (String, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = format!("http://{}", listener.local_addr().expect("local addr"));
    let state = state_for(&addr, difficulty);
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    (addr, state)
}

pub fn mined_chain(len: usize) -> Vec<Block> {
    let mut chain = vec![genesis_block()];
    while chain.len() < len {
        let template = BlockTemplate::next(chain.last().unwrap(), format!("remote {}", chain.len()), 1);
        chain.push(mine_block(template));
    }
    chain
}
