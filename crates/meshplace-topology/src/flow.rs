//! Flow demands derived from a placement and a network requirement.
//!
//! An edge between two endpoints becomes one flow per pair of distinct
//! domains hosting its source and destination components. Flows inside a
//! single domain never touch a virtual link and are skipped.

use std::collections::{BTreeMap, BTreeSet};

use meshplace_core::{ComponentName, DomainId, EndpointId, NetworkRequirement, SlaDemand};
use serde::{Deserialize, Serialize};

/// One SLA demand between one pair of concrete domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDemand {
    pub source_endpoint: EndpointId,
    pub destination_endpoint: EndpointId,
    pub source_component: ComponentName,
    pub destination_component: ComponentName,
    pub source_domain: DomainId,
    pub destination_domain: DomainId,
    pub sla: SlaDemand,
}

impl FlowDemand {
    pub fn edge_label(&self) -> String {
        format!("{}->{}", self.source_endpoint, self.destination_endpoint)
    }
}

impl std::fmt::Display for FlowDemand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{} ({}->{}, bw {})",
            self.source_endpoint,
            self.destination_endpoint,
            self.source_domain,
            self.destination_domain,
            self.sla.bandwidth
        )
    }
}

/// Derive flow demands in a stable order: communications and edges in
/// declaration order, domain pairs ascending.
///
/// `placement` maps each component to the domains hosting at least one of
/// its replicas. Edges whose endpoints are unknown or whose components are
/// unplaced yield no flows.
pub fn flow_demands(
    requirement: &NetworkRequirement,
    placement: &BTreeMap<ComponentName, BTreeSet<DomainId>>,
) -> Vec<FlowDemand> {
    let owners = requirement.endpoint_owners();
    let mut flows = Vec::new();

    for comm in &requirement.communications {
        for edge in &comm.edges {
            let (Some(src_comp), Some(dst_comp)) = (
                owners.get(edge.source.as_str()),
                owners.get(edge.destination.as_str()),
            ) else {
                continue;
            };
            let (Some(src_domains), Some(dst_domains)) =
                (placement.get(*src_comp), placement.get(*dst_comp))
            else {
                continue;
            };

            for src in src_domains {
                for dst in dst_domains {
                    if src == dst {
                        continue;
                    }
                    flows.push(FlowDemand {
                        source_endpoint: edge.source.clone(),
                        destination_endpoint: edge.destination.clone(),
                        source_component: src_comp.to_string(),
                        destination_component: dst_comp.to_string(),
                        source_domain: src.clone(),
                        destination_domain: dst.clone(),
                        sla: edge.sla,
                    });
                }
            }
        }
    }

    flows
}
