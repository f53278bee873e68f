//! Topology-update messages exchanged with remote domain agents.
//!
//! Each message replaces the full outgoing link set of one domain. The
//! encoding is bincode over the serde representation below.

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::link::{LinkSla, VirtualLink};

/// Link-state report for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyUpdate {
    pub domain_id: u64,
    pub domain_name: String,
    pub local_node_sn: String,
    pub links: Vec<VirtualLinkUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualLinkUpdate {
    pub remote_domain_id: u64,
    pub remote_domain_name: String,
    pub local_node_sn: String,
    pub remote_node_sn: String,
    pub attach_domain_id: u64,
    pub attach_domain_name: String,
    pub sla: LinkSla,
}

impl VirtualLinkUpdate {
    /// A fresh link with nothing reserved yet.
    pub fn into_link(self) -> VirtualLink {
        VirtualLink {
            remote_domain: self.remote_domain_name,
            remote_domain_id: self.remote_domain_id,
            local_node_sn: self.local_node_sn,
            remote_node_sn: self.remote_node_sn,
            attach_domain_id: self.attach_domain_id,
            attach_domain_name: self.attach_domain_name,
            sla: self.sla,
            reserved: 0,
        }
    }
}

impl TopologyUpdate {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(data).map_err(|e| WireError::Decode(e.to_string()))
    }
}
