//! Periodic pull-based synchronization with registered peers.
//!
//! Each cycle walks the registry, probes every other node, downloads its
//! chain and offers it to [`Ledger::replace_if_better`]. A peer that is down
//! or answers garbage is logged and skipped; it never ends the cycle.

use crate::constants::{
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_SYNC_INTERVAL_SECS,
};
use ledger_core::{Block, Ledger, NodeRegistry};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer {peer} is unreachable: {source}")]
    Unreachable {
        peer: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("fetching chain from {peer} failed: {source}")]
    Fetch {
        peer: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("peer {peer} answered {status}")]
    Status { peer: String, status: StatusCode },
    #[error("peer {peer} sent a malformed chain: {source}")]
    Malformed {
        peer: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("ledger task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of one pass over the peer list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub contacted: usize,
    pub unreachable: usize,
    pub failed: usize,
    /// Last peer whose chain replaced ours during the cycle.
    pub adopted_from: Option<String>,
}

pub struct Synchronizer {
    ledger: Arc<Ledger>,
    registry: Arc<NodeRegistry>,
    client: Client,
    config: SyncConfig,
}

impl Synchronizer {
    pub fn new(ledger: Arc<Ledger>, registry: Arc<NodeRegistry>, config: SyncConfig) -> Self {
        Self {
            ledger,
            registry,
            client: Client::new(),
            config,
        }
    }

    pub async fn run_cycle(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for peer in self.registry.peers() {
            report.contacted += 1;
            match self.sync_with(&peer).await {
                Ok(true) => report.adopted_from = Some(peer),
                Ok(false) => {}
                Err(e @ SyncError::Unreachable { .. }) => {
                    report.unreachable += 1;
                    debug!(error = %e, "skipping offline peer");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "skipping peer");
                }
            }
        }
        report
    }

    async fn sync_with(&self, peer: &str) -> Result<bool, SyncError> {
        self.probe(peer).await?;
        let candidate = self.fetch_chain(peer).await?;
        debug!(peer, blocks = candidate.len(), "fetched peer chain");

        let ledger = Arc::clone(&self.ledger);
        let adopted = tokio::task::spawn_blocking(move || ledger.replace_if_better(candidate)).await?;
        if adopted {
            info!(peer, blocks = self.ledger.len(), "chain updated from peer");
        }
        Ok(adopted)
    }

    /// Any HTTP answer within the probe timeout counts as alive.
    pub async fn probe(&self, peer: &str) -> Result<(), SyncError> {
        self.client
            .get(format!("{peer}/health"))
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|source| SyncError::Unreachable {
                peer: peer.to_string(),
                source,
            })?;
        Ok(())
    }

    pub async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, SyncError> {
        let response = self
            .client
            .get(format!("{peer}/blockchain"))
            .timeout(self.config.fetch_timeout)
            .send()
            .await
            .map_err(|source| SyncError::Fetch {
                peer: peer.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                peer: peer.to_string(),
                status,
            });
        }
        response
            .json::<Vec<Block>>()
            .await
            .map_err(|source| SyncError::Malformed {
                peer: peer.to_string(),
                source,
            })
    }

    /// Runs a cycle every `interval` until `shutdown` flips to true or its
    /// sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            info!(interval = ?self.config.interval, "synchronizer started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.run_cycle().await;
                        debug!(?report, "sync cycle finished");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("synchronizer stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
