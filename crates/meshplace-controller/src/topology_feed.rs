//! Feed task applying encoded topology updates to the shared topology.

use std::sync::Arc;

use meshplace_topology::DomainTopology;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Counts of messages handled by a feed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub applied: u64,
    pub skipped: u64,
}

pub struct TopologyFeed {
    topology: Arc<DomainTopology>,
    updates: mpsc::Receiver<Vec<u8>>,
}

/// Create a feed and the sender publishers write bincode messages to.
pub fn channel(topology: Arc<DomainTopology>, capacity: usize) -> (mpsc::Sender<Vec<u8>>, TopologyFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        tx,
        TopologyFeed {
            topology,
            updates: rx,
        },
    )
}

impl TopologyFeed {
    /// Apply messages until every sender is dropped or shutdown is signalled.
    /// Messages that fail to decode or apply are logged and skipped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> FeedStats {
        info!("topology feed started");
        let mut stats = FeedStats::default();

        loop {
            tokio::select! {
                message = self.updates.recv() => {
                    let Some(bytes) = message else {
                        debug!("topology publishers closed");
                        break;
                    };
                    match self.topology.apply_bytes(&bytes) {
                        Ok(summary) => {
                            stats.applied += 1;
                            debug!(
                                added = summary.added,
                                kept = summary.kept,
                                removed = summary.removed,
                                "topology update applied"
                            );
                        }
                        Err(e) => {
                            stats.skipped += 1;
                            warn!(error = %e, bytes = bytes.len(), "skipping topology update");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("topology feed shutting down");
                    break;
                }
            }
        }

        stats
    }
}
