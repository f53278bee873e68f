//! Virtual links between network domains.

use meshplace_core::DomainId;
use serde::{Deserialize, Serialize};

/// Static link attributes as reported by the local domain agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LinkSla {
    pub delay: u64,
    pub loss: u64,
    pub jitter: u64,
    /// Total bandwidth of the link.
    pub bandwidth: u64,
    /// Free bandwidth as last reported by the agent.
    pub free_bandwidth: u64,
}

/// Identity of a directed link. Two reports describe the same link when
/// their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub from: DomainId,
    pub to: DomainId,
    pub local_node_sn: String,
    pub remote_node_sn: String,
}

impl std::fmt::Display for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// A directed link from the owning domain to `remote_domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualLink {
    pub remote_domain: DomainId,
    pub remote_domain_id: u64,
    pub local_node_sn: String,
    pub remote_node_sn: String,
    pub attach_domain_id: u64,
    pub attach_domain_name: String,
    pub sla: LinkSla,
    /// Bandwidth reserved by admitted flows.
    pub reserved: u64,
}

impl VirtualLink {
    /// Bandwidth still admissible on this link.
    pub fn available(&self) -> u64 {
        self.sla.free_bandwidth.saturating_sub(self.reserved)
    }

    pub fn key(&self, from: &str) -> LinkKey {
        LinkKey {
            from: from.to_string(),
            to: self.remote_domain.clone(),
            local_node_sn: self.local_node_sn.clone(),
            remote_node_sn: self.remote_node_sn.clone(),
        }
    }

    fn same_endpoints(&self, other: &VirtualLink) -> bool {
        self.remote_domain == other.remote_domain
            && self.local_node_sn == other.local_node_sn
            && self.remote_node_sn == other.remote_node_sn
    }

    /// Whether `key` (rooted at domain `from`) names this link.
    pub fn matches(&self, key: &LinkKey) -> bool {
        self.remote_domain == key.to
            && self.local_node_sn == key.local_node_sn
            && self.remote_node_sn == key.remote_node_sn
    }

    /// Carry the reserved counter of a previous report of the same link.
    pub(crate) fn inherit_reserved(&mut self, previous: &[VirtualLink]) -> bool {
        match previous.iter().find(|old| old.same_endpoints(self)) {
            Some(old) => {
                self.reserved = old.reserved;
                true
            }
            None => false,
        }
    }
}
