//! Directed domain graph and SLA-bounded path search.
//!
//! [`TopologyGraph`] is plain data. Shared access goes through
//! [`DomainTopology`](crate::DomainTopology), which hands out clones of the
//! graph as snapshots and mutates it only inside its write lock.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use meshplace_core::{DomainId, SlaDemand};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PathFailure, TopologyError, TopologyResult};
use crate::flow::FlowDemand;
use crate::link::{LinkKey, VirtualLink};
use crate::wire::TopologyUpdate;

/// A domain and its outgoing links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Domain {
    pub name: DomainId,
    pub id: u64,
    pub local_node_sn: String,
    pub links: Vec<VirtualLink>,
}

/// A route through the graph with its accumulated attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Path {
    /// Domains visited, source first.
    pub domains: Vec<DomainId>,
    pub hops: Vec<LinkKey>,
    pub delay: u64,
    pub loss: u64,
    pub jitter: u64,
}

/// What a refresh changed for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub kept: usize,
    pub removed: usize,
    /// Reserved bandwidth carried by removed links.
    pub dropped_reserved: u64,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    bandwidth: bool,
    sla: bool,
}

impl Limits {
    const STRICT: Limits = Limits {
        bandwidth: true,
        sla: true,
    };
}

/// One partial path ending at `domain`. `parent` indexes the label arena.
#[derive(Debug, Clone)]
struct Label {
    domain: DomainId,
    delay: u64,
    loss: u64,
    jitter: u64,
    parent: Option<(usize, LinkKey)>,
    dominated: bool,
}

impl Label {
    /// True when `self` is at least as good as `other` on every bounded
    /// attribute. Only delay counts when SLA bounds are off.
    fn covers(&self, other: &Label, limits: Limits) -> bool {
        if !limits.sla {
            return self.delay <= other.delay;
        }
        self.delay <= other.delay && self.loss <= other.loss && self.jitter <= other.jitter
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyGraph {
    domains: BTreeMap<DomainId, Domain>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a batch of updates applied in order.
    pub fn from_updates<I>(updates: I) -> TopologyResult<Self>
    where
        I: IntoIterator<Item = TopologyUpdate>,
    {
        let mut graph = Self::new();
        for update in updates {
            graph.apply_update(update)?;
        }
        Ok(graph)
    }

    /// Whether a domain has reported its link state.
    pub fn contains_domain(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    pub fn domain(&self, domain: &str) -> Option<&Domain> {
        self.domains.get(domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values()
    }

    pub fn outgoing(&self, domain: &str) -> &[VirtualLink] {
        self.domains
            .get(domain)
            .map(|d| d.links.as_slice())
            .unwrap_or(&[])
    }

    /// First link from `from` to `to`, if any.
    pub fn find_link(&self, from: &str, to: &str) -> Option<&VirtualLink> {
        self.outgoing(from).iter().find(|l| l.remote_domain == to)
    }

    pub fn link(&self, key: &LinkKey) -> Option<&VirtualLink> {
        self.outgoing(&key.from).iter().find(|l| l.matches(key))
    }

    fn link_mut(&mut self, key: &LinkKey) -> Option<&mut VirtualLink> {
        self.domains
            .get_mut(&key.from)?
            .links
            .iter_mut()
            .find(|l| l.matches(key))
    }

    /// Largest available bandwidth on any outgoing link of `domain`.
    pub fn max_available_from(&self, domain: &str) -> Option<u64> {
        self.outgoing(domain).iter().map(VirtualLink::available).max()
    }

    /// Largest available bandwidth on any link arriving at `domain`.
    pub fn max_available_into(&self, domain: &str) -> Option<u64> {
        self.domains
            .values()
            .flat_map(|d| d.links.iter())
            .filter(|l| l.remote_domain == domain)
            .map(VirtualLink::available)
            .max()
    }

    /// Sum of reserved bandwidth over every link.
    pub fn total_reserved(&self) -> u64 {
        self.domains
            .values()
            .flat_map(|d| d.links.iter())
            .map(|l| l.reserved)
            .sum()
    }

    // ── Refresh ───────────────────────────────────────────────────

    /// Replace the outgoing link set of the reporting domain.
    ///
    /// Links present before and after keep their reserved counter; new links
    /// start unreserved; removed links are dropped with their counter.
    pub fn apply_update(&mut self, update: TopologyUpdate) -> TopologyResult<RefreshSummary> {
        if update.domain_name.is_empty() {
            return Err(TopologyError::InvalidUpdate(
                "domain name is empty".to_string(),
            ));
        }
        if let Some(link) = update
            .links
            .iter()
            .find(|l| l.remote_domain_name == update.domain_name)
        {
            return Err(TopologyError::InvalidUpdate(format!(
                "domain {} reports a link to itself via {}",
                update.domain_name, link.remote_node_sn
            )));
        }

        let previous = self
            .domains
            .remove(&update.domain_name)
            .map(|d| d.links)
            .unwrap_or_default();

        let mut summary = RefreshSummary::default();
        let mut links = Vec::with_capacity(update.links.len());
        for link_update in update.links {
            let mut link = link_update.into_link();
            if link.inherit_reserved(&previous) {
                summary.kept += 1;
                if link.reserved > link.sla.free_bandwidth {
                    warn!(
                        domain = %update.domain_name,
                        remote = %link.remote_domain,
                        reserved = link.reserved,
                        free = link.sla.free_bandwidth,
                        "refresh shrank link below its reservations"
                    );
                }
            } else {
                summary.added += 1;
            }
            links.push(link);
        }

        for old in &previous {
            if !links.iter().any(|l| l.matches(&old.key(&update.domain_name))) {
                summary.removed += 1;
                summary.dropped_reserved += old.reserved;
                if old.reserved > 0 {
                    warn!(
                        domain = %update.domain_name,
                        remote = %old.remote_domain,
                        reserved = old.reserved,
                        "link removed while bandwidth was reserved on it"
                    );
                }
            }
        }

        debug!(
            domain = %update.domain_name,
            added = summary.added,
            kept = summary.kept,
            removed = summary.removed,
            "topology refreshed"
        );

        self.domains.insert(
            update.domain_name.clone(),
            Domain {
                name: update.domain_name,
                id: update.domain_id,
                local_node_sn: update.local_node_sn,
                links,
            },
        );
        Ok(summary)
    }

    // ── Reservation counters ──────────────────────────────────────

    pub(crate) fn reserve(&mut self, hops: &[LinkKey], bandwidth: u64) {
        for hop in hops {
            if let Some(link) = self.link_mut(hop) {
                link.reserved = link.reserved.saturating_add(bandwidth);
            }
        }
    }

    /// Give back bandwidth on `hops`. Links that disappeared in a refresh
    /// are skipped; their counters went with them.
    pub(crate) fn release(&mut self, hops: &[LinkKey], bandwidth: u64) {
        for hop in hops {
            match self.link_mut(hop) {
                Some(link) => link.reserved = link.reserved.saturating_sub(bandwidth),
                None => debug!(link = %hop, bandwidth, "released link no longer exists"),
            }
        }
    }

    // ── Path search ───────────────────────────────────────────────

    /// Lowest-delay path for `flow` over links with enough available
    /// bandwidth, staying within the flow's delay, loss and jitter bounds.
    pub fn shortest_path(&self, flow: &FlowDemand) -> Result<Path, PathFailure> {
        if !self.contains_domain(&flow.source_domain) {
            return Err(PathFailure::UnknownSource(flow.source_domain.clone()));
        }
        let (src, dst, sla) = (&flow.source_domain, &flow.destination_domain, &flow.sla);

        if let Some(path) = self.search(src, dst, sla, Limits::STRICT) {
            return Ok(path);
        }

        let within_sla = Limits {
            bandwidth: false,
            sla: true,
        };
        let unbounded = Limits {
            bandwidth: false,
            sla: false,
        };
        if self.search(src, dst, sla, within_sla).is_some() {
            Err(PathFailure::InsufficientBandwidth {
                requested: sla.bandwidth,
            })
        } else if self.search(src, dst, sla, unbounded).is_some() {
            Err(PathFailure::SlaExceeded)
        } else {
            Err(PathFailure::Unreachable)
        }
    }

    /// Label-setting Dijkstra on delay. Each domain keeps every partial
    /// path not dominated on (delay, loss, jitter), so a faster prefix that
    /// breaks a loss or jitter bound cannot hide a slower one that fits.
    /// Heap ties resolve on loss, jitter, then domain name ascending; among
    /// equal labels the first one found wins.
    fn search(&self, source: &str, destination: &str, sla: &SlaDemand, limits: Limits) -> Option<Path> {
        let mut arena: Vec<Label> = vec![Label {
            domain: source.to_string(),
            delay: 0,
            loss: 0,
            jitter: 0,
            parent: None,
            dominated: false,
        }];
        let mut at: BTreeMap<DomainId, Vec<usize>> = BTreeMap::new();
        at.entry(source.to_string()).or_default().push(0);

        let mut heap = BinaryHeap::new();
        heap.push(Reverse((0u64, 0u64, 0u64, source.to_string(), 0usize)));

        while let Some(Reverse((_, _, _, node, index))) = heap.pop() {
            if arena[index].dominated {
                continue;
            }
            if node == destination {
                return Some(trace(&arena, index));
            }
            let current = arena[index].clone();

            for link in self.outgoing(&node) {
                if limits.bandwidth && link.available() < sla.bandwidth {
                    continue;
                }
                let next = Label {
                    domain: link.remote_domain.clone(),
                    delay: current.delay.saturating_add(link.sla.delay),
                    loss: current.loss.saturating_add(link.sla.loss),
                    jitter: current.jitter.saturating_add(link.sla.jitter),
                    parent: Some((index, link.key(&node))),
                    dominated: false,
                };
                if limits.sla
                    && (next.delay > sla.delay || next.loss > sla.loss || next.jitter > sla.jitter)
                {
                    continue;
                }

                let known = at.entry(link.remote_domain.clone()).or_default();
                if known.iter().any(|&k| arena[k].covers(&next, limits)) {
                    continue;
                }
                known.retain(|&k| {
                    let beaten = next.covers(&arena[k], limits);
                    if beaten {
                        arena[k].dominated = true;
                    }
                    !beaten
                });

                let slot = arena.len();
                known.push(slot);
                heap.push(Reverse((
                    next.delay,
                    next.loss,
                    next.jitter,
                    link.remote_domain.clone(),
                    slot,
                )));
                arena.push(next);
            }
        }

        None
    }
}

fn trace(arena: &[Label], end: usize) -> Path {
    let last = &arena[end];
    let mut domains = vec![last.domain.clone()];
    let mut hops = Vec::new();

    let mut cursor = end;
    while let Some((prev, hop)) = arena[cursor].parent.clone() {
        hops.push(hop);
        domains.push(arena[prev].domain.clone());
        cursor = prev;
    }
    domains.reverse();
    hops.reverse();

    Path {
        domains,
        hops,
        delay: last.delay,
        loss: last.loss,
        jitter: last.jitter,
    }
}
