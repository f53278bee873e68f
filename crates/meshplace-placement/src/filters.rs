//! Filter plugins.
//!
//! Each filter is a pure predicate over a candidate cluster, the component's
//! placement constraints and the topology snapshot in the run context.

use meshplace_core::{Cluster, Component, ComponentKind, labels};

use crate::error::PluginError;
use crate::framework::{CycleState, FilterPlugin, Plugin, SchedulingContext, Verdict};

macro_rules! filter_plugin {
    ($ty:ident, $name:literal) => {
        impl Plugin for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn as_filter(&self) -> Option<&dyn FilterPlugin> {
                Some(self)
            }
        }
    };
}

/// Every taint on the cluster must be tolerated by the component.
#[derive(Debug, Default)]
pub struct TaintToleration;

filter_plugin!(TaintToleration, "TaintToleration");

impl FilterPlugin for TaintToleration {
    fn filter(
        &self,
        _ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<Verdict, PluginError> {
        let tolerations = &component.placement.tolerations;
        let untolerated = cluster
            .taints
            .iter()
            .find(|taint| !tolerations.iter().any(|t| t.tolerates(taint)));
        Ok(match untolerated {
            Some(taint) => Verdict::reject(format!(
                "untolerated taint {}={}:{:?}",
                taint.key, taint.value, taint.effect
            )),
            None => Verdict::Accept,
        })
    }
}

/// Allocatable resources must host at least one replica.
#[derive(Debug, Default)]
pub struct SpecificResource;

filter_plugin!(SpecificResource, "SpecificResource");

impl FilterPlugin for SpecificResource {
    fn filter(
        &self,
        _ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<Verdict, PluginError> {
        let demand = &component.resources;
        let free = &cluster.allocatable;
        if free.cpu_millis < demand.cpu_millis {
            return Ok(Verdict::reject(format!(
                "insufficient cpu: {}m allocatable, {}m requested",
                free.cpu_millis, demand.cpu_millis
            )));
        }
        if free.memory_bytes < demand.memory_bytes {
            return Ok(Verdict::reject(format!(
                "insufficient memory: {} allocatable, {} requested",
                free.memory_bytes, demand.memory_bytes
            )));
        }
        Ok(Verdict::Accept)
    }
}

/// Affinity tags must match cluster labels exactly. Daemon components also
/// need at least one ready node.
#[derive(Debug, Default)]
pub struct AffinityDaemon;

filter_plugin!(AffinityDaemon, "AffinityDaemon");

impl FilterPlugin for AffinityDaemon {
    fn filter(
        &self,
        _ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<Verdict, PluginError> {
        for (key, want) in &component.placement.affinity {
            match cluster.label(key) {
                Some(have) if have == want => {}
                Some(have) => {
                    return Ok(Verdict::reject(format!(
                        "affinity {key}={want} not met (cluster has {have})"
                    )));
                }
                None => {
                    return Ok(Verdict::reject(format!("affinity label {key} missing")));
                }
            }
        }
        if component.kind == ComponentKind::Daemon && cluster.nodes.ready_nodes == 0 {
            return Ok(Verdict::reject("daemon component needs a ready node"));
        }
        Ok(Verdict::Accept)
    }
}

/// Components with inter-endpoint edges need a cluster whose domain is in
/// the topology. Senders need an outgoing link able to carry their largest
/// outbound edge, receivers an incoming link for their largest inbound one.
#[derive(Debug, Default)]
pub struct NetEnvironment;

filter_plugin!(NetEnvironment, "NetEnvironment");

impl FilterPlugin for NetEnvironment {
    fn filter(
        &self,
        ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<Verdict, PluginError> {
        let Some(requirement) = ctx.requirement else {
            return Ok(Verdict::Accept);
        };
        let demands = requirement.component_bandwidth_demands();
        let Some(&needed) = demands.get(component.name.as_str()) else {
            return Ok(Verdict::Accept);
        };

        let domain = &cluster.network_domain;
        if !ctx.topology.contains_domain(domain) {
            return Ok(Verdict::reject(format!(
                "network domain {domain} not present in topology"
            )));
        }
        if needed.outbound > 0 {
            let best = ctx.topology.max_available_from(domain);
            if let Some(reason) = shortfall(best, needed.outbound, &format!("from {domain}")) {
                return Ok(Verdict::Reject(reason));
            }
        }
        if needed.inbound > 0 {
            let best = ctx.topology.max_available_into(domain);
            if let Some(reason) = shortfall(best, needed.inbound, &format!("into {domain}")) {
                return Ok(Verdict::Reject(reason));
            }
        }
        Ok(Verdict::Accept)
    }
}

fn shortfall(best: Option<u64>, needed: u64, direction: &str) -> Option<String> {
    match best {
        Some(best) if best >= needed => None,
        Some(best) => Some(format!(
            "no link {direction} with {needed} bandwidth (best {best})"
        )),
        None => Some(format!("no links {direction}")),
    }
}

/// The cluster's geolocation label must be one of the allowed locations.
#[derive(Debug, Default)]
pub struct Geolocation;

filter_plugin!(Geolocation, "Geolocation");

impl FilterPlugin for Geolocation {
    fn filter(
        &self,
        _ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<Verdict, PluginError> {
        let allowed = &component.placement.geolocations;
        if allowed.is_empty() {
            return Ok(Verdict::Accept);
        }
        Ok(match cluster.label(labels::GEO_LOCATION) {
            Some(geo) if allowed.iter().any(|a| a == geo) => Verdict::Accept,
            Some(geo) => Verdict::reject(format!("geolocation {geo} not allowed")),
            None => Verdict::reject("cluster has no geolocation"),
        })
    }
}

/// Shared check for single-label equality filters.
fn required_label(cluster: &Cluster, key: &str, want: Option<&String>, what: &str) -> Verdict {
    let Some(want) = want else {
        return Verdict::Accept;
    };
    match cluster.label(key) {
        Some(have) if have == want => Verdict::Accept,
        Some(have) => Verdict::reject(format!("{what} {have} does not match {want}")),
        None => Verdict::reject(format!("cluster has no {what}")),
    }
}

#[derive(Debug, Default)]
pub struct SupplierName;

filter_plugin!(SupplierName, "SupplierName");

impl FilterPlugin for SupplierName {
    fn filter(
        &self,
        _ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<Verdict, PluginError> {
        Ok(required_label(
            cluster,
            labels::SUPPLIER_NAME,
            component.placement.supplier.as_ref(),
            "supplier",
        ))
    }
}

#[derive(Debug, Default)]
pub struct RuntimeType;

filter_plugin!(RuntimeType, "RuntimeType");

impl FilterPlugin for RuntimeType {
    fn filter(
        &self,
        _ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<Verdict, PluginError> {
        Ok(required_label(
            cluster,
            labels::RUNTIME_TYPE,
            component.placement.runtime.as_ref(),
            "runtime",
        ))
    }
}
