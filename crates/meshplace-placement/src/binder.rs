//! Resource binding generation.
//!
//! Turns ranked candidates into replica counts per cluster:
//!
//! 1. Components are allocated in declaration order and share each
//!    cluster's allocatable resources.
//! 2. Replicas are split across the tied-best clusters proportionally to
//!    score using the largest-remainder method, clamped to capacity.
//! 3. Whatever the tied-best group cannot hold goes greedily down the rank.
//! 4. Daemon components get one replica on every ranked cluster with room.

use std::collections::BTreeMap;

use meshplace_core::{
    BindingEntry, Cluster, ClusterId, ComponentKind, ComponentName, ResourceBinding, ResourceList,
    WorkloadDescriptor,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::pipeline::{ComponentPlan, RankedCandidate};

/// A component that could not be fully placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmetComponent {
    pub component: ComponentName,
    pub requested: u32,
    pub placed: u32,
}

impl std::fmt::Display for UnmetComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}/{})", self.component, self.placed, self.requested)
    }
}

/// Generated binding plus any shortfall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingPlan {
    pub binding: ResourceBinding,
    pub unmet: Vec<UnmetComponent>,
}

impl BindingPlan {
    pub fn is_complete(&self) -> bool {
        self.unmet.is_empty()
    }
}

/// Build a binding for `workload` from its component plans.
///
/// `clusters` supplies allocatable resources. Plans for components the
/// workload does not declare are ignored.
pub fn generate_binding(
    workload: &WorkloadDescriptor,
    plans: &[ComponentPlan],
    clusters: &[Cluster],
) -> BindingPlan {
    let mut free: BTreeMap<&str, ResourceList> = clusters
        .iter()
        .map(|c| (c.id.as_str(), c.allocatable))
        .collect();
    let mut placement: BTreeMap<ClusterId, BTreeMap<ComponentName, u32>> = BTreeMap::new();
    let mut unmet = Vec::new();

    for component in &workload.components {
        let Some(plan) = plans.iter().find(|p| p.component == component.name) else {
            unmet.push(UnmetComponent {
                component: component.name.clone(),
                requested: component.replicas,
                placed: 0,
            });
            continue;
        };

        let capacity = |free: &BTreeMap<&str, ResourceList>, id: &str| -> u32 {
            match free.get(id).map(|r| r.fits(&component.resources)) {
                Some(Some(n)) => u32::try_from(n).unwrap_or(u32::MAX),
                Some(None) => u32::MAX,
                None => 0,
            }
        };

        let candidates: Vec<(&RankedCandidate, u32)> = plan
            .ranked
            .iter()
            .map(|c| (c, capacity(&free, &c.cluster)))
            .filter(|(_, cap)| *cap > 0)
            .collect();

        let (assigned, requested) = match component.kind {
            ComponentKind::Daemon => {
                let assigned: Vec<(&str, u32)> =
                    candidates.iter().map(|(c, _)| (c.cluster.as_str(), 1)).collect();
                (assigned, 1)
            }
            ComponentKind::Workload => (
                allocate_replicas(component.replicas, &candidates),
                component.replicas,
            ),
        };

        let mut placed = 0u32;
        for (cluster, count) in assigned {
            if count == 0 {
                continue;
            }
            placed += count;
            if let Some(resources) = free.get_mut(cluster) {
                resources.consume(&component.resources, count);
            }
            placement
                .entry(cluster.to_string())
                .or_default()
                .insert(component.name.clone(), count);
            debug!(
                workload = %workload.key(),
                component = %component.name,
                cluster,
                replicas = count,
                "replicas assigned"
            );
        }

        if placed < requested {
            warn!(
                workload = %workload.key(),
                component = %component.name,
                requested,
                placed,
                "could not place all replicas: insufficient capacity"
            );
            unmet.push(UnmetComponent {
                component: component.name.clone(),
                requested,
                placed,
            });
        }
    }

    BindingPlan {
        binding: ResourceBinding {
            workload: workload.key(),
            entries: placement
                .into_iter()
                .map(|(cluster, replicas)| BindingEntry { cluster, replicas })
                .collect(),
        },
        unmet,
    }
}

/// Split `replicas` over ranked `(candidate, capacity)` pairs.
fn allocate_replicas<'a>(replicas: u32, ranked: &[(&'a RankedCandidate, u32)]) -> Vec<(&'a str, u32)> {
    let Some((top, _)) = ranked.first() else {
        return Vec::new();
    };
    let group_len = ranked.iter().take_while(|(c, _)| c.score == top.score).count();
    let (group, rest) = ranked.split_at(group_len);

    let mut shares: Vec<u32> = vec![0; group.len()];
    let mut remaining = replicas;
    loop {
        let open: Vec<usize> = (0..group.len()).filter(|&i| shares[i] < group[i].1).collect();
        if remaining == 0 || open.is_empty() {
            break;
        }
        let weights: Vec<(&str, u64)> = open
            .iter()
            .map(|&i| (group[i].0.cluster.as_str(), group[i].0.score))
            .collect();
        let quota = largest_remainder(remaining, &weights);
        for (slot, &i) in open.iter().enumerate() {
            let room = group[i].1 - shares[i];
            let take = quota[slot].min(room);
            shares[i] += take;
            remaining -= take;
        }
    }

    let mut assigned: Vec<(&'a str, u32)> = group
        .iter()
        .zip(shares)
        .map(|((c, _), n)| (c.cluster.as_str(), n))
        .collect();

    for (candidate, cap) in rest {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(*cap);
        remaining -= take;
        assigned.push((candidate.cluster.as_str(), take));
    }
    assigned
}

/// Apportion `total` over `weights` with the largest-remainder method.
/// Leftover units go to the largest fractional remainders, ties by name
/// ascending. All-zero weights split evenly.
pub fn largest_remainder(total: u32, weights: &[(&str, u64)]) -> Vec<u32> {
    if weights.is_empty() {
        return Vec::new();
    }
    let uniform = weights.iter().all(|(_, w)| *w == 0);
    let weight = |w: u64| -> u128 { if uniform { 1 } else { u128::from(w) } };
    let sum: u128 = weights.iter().map(|(_, w)| weight(*w)).sum();

    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for (i, (name, w)) in weights.iter().enumerate() {
        let numerator = u128::from(total) * weight(*w);
        // The quotient never exceeds `total`.
        shares.push((numerator / sum) as u32);
        remainders.push((numerator % sum, *name, i));
    }

    let assigned: u32 = shares.iter().sum();
    let mut leftover = total - assigned;
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    for (_, _, i) in remainders {
        if leftover == 0 {
            break;
        }
        shares[i] += 1;
        leftover -= 1;
    }
    shares
}
