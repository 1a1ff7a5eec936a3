use crate::error::StoreError;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{error, info};

/// Persistence for the peer address list.
pub trait PeerStore: Send + Sync {
    /// `Ok(None)` when no list has been saved yet.
    fn load_peers(&self) -> Result<Option<Vec<String>>, StoreError>;
    fn save_peers(&self, peers: &[String]) -> Result<(), StoreError>;
}

/// Rejected registry mutation. Nothing is changed when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("node address must not be empty")]
    Empty,
    #[error("cannot register this node's own address: {0}")]
    SelfRegistration(String),
    #[error("node already registered: {0}")]
    AlreadyRegistered(String),
    #[error("node not found: {0}")]
    NotFound(String),
}

/// Trims whitespace and trailing slashes so `http://host:1/` and
/// `http://host:1` are the same peer.
pub fn normalize_address(addr: &str) -> String {
    addr.trim().trim_end_matches('/').to_string()
}

/// Known peer addresses, always including this node's own.
pub struct NodeRegistry<P: PeerStore + ?Sized = dyn PeerStore> {
    self_addr: String,
    nodes: RwLock<Vec<String>>,
    store: Arc<P>,
}

impl<P: PeerStore + ?Sized> NodeRegistry<P> {
    pub fn open(self_addr: impl AsRef<str>, store: Arc<P>) -> Self {
        let self_addr = normalize_address(self_addr.as_ref());
        let (mut nodes, loaded) = match store.load_peers() {
            Ok(Some(saved)) => {
                let mut nodes: Vec<String> = Vec::with_capacity(saved.len() + 1);
                for addr in saved.iter().map(|a| normalize_address(a)) {
                    if !addr.is_empty() && !nodes.contains(&addr) {
                        nodes.push(addr);
                    }
                }
                (nodes, true)
            }
            Ok(None) => {
                info!("no peer list found, starting with this node only");
                (Vec::new(), true)
            }
            Err(e) => {
                error!(error = %e, "failed to load peer list, starting with this node only");
                (Vec::new(), false)
            }
        };

        let missing_self = !nodes.contains(&self_addr);
        if missing_self {
            nodes.push(self_addr.clone());
        }
        let registry = Self {
            self_addr,
            nodes: RwLock::new(nodes),
            store,
        };
        // An unreadable list is left on disk untouched until the next change.
        if missing_self && loaded {
            info!(node = %registry.self_addr, "added own address to peer list");
            registry.persist(&registry.list());
        }
        info!(nodes = ?registry.list(), "peer registry ready");
        registry
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn list(&self) -> Vec<String> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every registered address except this node's own.
    pub fn peers(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|addr| *addr != self.self_addr)
            .collect()
    }

    pub fn add(&self, addr: &str) -> Result<String, RegistryError> {
        let addr = normalize_address(addr);
        if addr.is_empty() {
            return Err(RegistryError::Empty);
        }
        if addr == self.self_addr {
            return Err(RegistryError::SelfRegistration(addr));
        }
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if nodes.contains(&addr) {
            return Err(RegistryError::AlreadyRegistered(addr));
        }
        nodes.push(addr.clone());
        self.persist(&nodes);
        info!(node = %addr, registered = nodes.len(), "registered node");
        Ok(addr)
    }

    pub fn remove(&self, addr: &str) -> Result<String, RegistryError> {
        let addr = normalize_address(addr);
        if addr.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let Some(position) = nodes.iter().position(|n| *n == addr) else {
            return Err(RegistryError::NotFound(addr));
        };
        nodes.remove(position);
        self.persist(&nodes);
        info!(node = %addr, registered = nodes.len(), "removed node");
        Ok(addr)
    }

    /// Writes the current list once more, e.g. on shutdown.
    pub fn flush(&self) {
        self.persist(&self.list());
    }

    fn persist(&self, nodes: &[String]) {
        if let Err(e) = self.store.save_peers(nodes) {
            error!(error = %e, "failed to persist peer list");
        }
    }
}
