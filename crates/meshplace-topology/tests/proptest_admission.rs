//! Property-based tests for concurrent bandwidth admission.
//!
//! Threads race admissions against one shared topology. Whatever the
//! interleaving, no link may hold more reserved bandwidth than it reports
//! free, and each link's counter must equal the sum of the committed
//! reservations crossing it.

use std::sync::Mutex;

use meshplace_core::SlaDemand;
use meshplace_topology::{
    DomainTopology, FlowDemand, LinkSla, Reservation, TopologyUpdate, VirtualLinkUpdate,
};
use proptest::prelude::*;

const DOMAINS: u64 = 4;

fn ring_with_chords() -> DomainTopology {
    let topology = DomainTopology::new();
    for id in 1..=DOMAINS {
        let links = (1..=DOMAINS)
            .filter(|remote| *remote != id)
            .map(|remote| VirtualLinkUpdate {
                remote_domain_id: remote,
                remote_domain_name: format!("d{remote}"),
                local_node_sn: String::new(),
                remote_node_sn: String::new(),
                attach_domain_id: 0,
                attach_domain_name: String::new(),
                sla: LinkSla {
                    delay: id.abs_diff(remote),
                    loss: 1,
                    jitter: 1,
                    bandwidth: 5_000,
                    free_bandwidth: 5_000,
                },
            })
            .collect();
        topology
            .apply_update(TopologyUpdate {
                domain_id: id,
                domain_name: format!("d{id}"),
                local_node_sn: String::new(),
                links,
            })
            .unwrap();
    }
    topology
}

fn flow(src: u64, dst: u64, bandwidth: u64) -> FlowDemand {
    FlowDemand {
        source_endpoint: format!("e{src}"),
        destination_endpoint: format!("e{dst}"),
        source_component: "a".to_string(),
        destination_component: "b".to_string(),
        source_domain: format!("d{src}"),
        destination_domain: format!("d{dst}"),
        sla: SlaDemand {
            delay: 10,
            loss: 10,
            jitter: 10,
            bandwidth,
        },
    }
}

/// One admission: a few flows plus whether the caller commits it.
fn any_admission() -> impl Strategy<Value = (Vec<FlowDemand>, bool)> {
    let one_flow = (1..=DOMAINS, 1..=DOMAINS, 1u64..3_000)
        .prop_filter("distinct domains", |(s, d, _)| s != d)
        .prop_map(|(s, d, bw)| flow(s, d, bw));
    (proptest::collection::vec(one_flow, 1..4), any::<bool>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn concurrent_admission_conserves_bandwidth(
        admissions in proptest::collection::vec(any_admission(), 1..16),
    ) {
        let topology = ring_with_chords();
        let committed: Mutex<Vec<Reservation>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for (flows, keep) in &admissions {
                let topology = &topology;
                let committed = &committed;
                scope.spawn(move || {
                    if let Ok(guard) = topology.admit(flows) {
                        if *keep {
                            committed.lock().unwrap().push(guard.commit());
                        }
                    }
                });
            }
        });

        let committed = committed.into_inner().unwrap();
        let graph = topology.snapshot();
        for domain in graph.domains() {
            for link in &domain.links {
                prop_assert!(link.reserved <= link.sla.free_bandwidth);
                let key = link.key(&domain.name);
                let expected: u64 = committed.iter().map(|r| r.bandwidth_on(&key)).sum();
                prop_assert_eq!(link.reserved, expected);
            }
        }

        for reservation in &committed {
            topology.release(reservation);
        }
        prop_assert_eq!(topology.snapshot().total_reserved(), 0);
    }

    #[test]
    fn rejected_admission_leaves_no_trace(
        prior in proptest::collection::vec(any_admission(), 0..6),
        oversized in 5_001u64..20_000,
    ) {
        let topology = ring_with_chords();
        let mut held = Vec::new();
        for (flows, _) in &prior {
            if let Ok(guard) = topology.admit(flows) {
                held.push(guard.commit());
            }
        }
        let before = topology.snapshot();

        let mut flows = vec![flow(1, 2, 1)];
        flows.push(flow(3, 4, oversized));
        prop_assert!(topology.admit(&flows).is_err());
        prop_assert_eq!(topology.snapshot(), before);

        for reservation in &held {
            topology.release(reservation);
        }
        prop_assert_eq!(topology.snapshot().total_reserved(), 0);
    }
}
