// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Selection-policy behavior of point lookup: closest-first, round-robin,
//! and destination-constrained resolution.

use svcdir::{Binding, Scope, ServiceDirectory};

const OWN: u32 = 0x0101;
const REMOTE: u32 = 0x0202;

#[test]
fn publish_translate_withdraw_roundtrip() {
    let dir = ServiceDirectory::new(OWN);

    dir.publish(10, 5, 5, Scope::Node, 100, 1).unwrap();
    assert_eq!(dir.translate(10, 5, None), Some(Binding::new(OWN, 100)));

    dir.withdraw(10, 5, 100, 1).unwrap();
    assert_eq!(dir.translate(10, 5, None), None);
}

#[test]
fn translate_resolves_any_instance_in_range() {
    let dir = ServiceDirectory::new(OWN);
    dir.publish(10, 100, 199, Scope::Cluster, 77, 1).unwrap();

    for instance in [100, 150, 199] {
        assert_eq!(dir.translate(10, instance, None).unwrap().port, 77);
    }
    assert_eq!(dir.translate(10, 99, None), None);
    assert_eq!(dir.translate(10, 200, None), None);
}

#[test]
fn round_robin_serves_each_binding_once_per_cycle() {
    let dir = ServiceDirectory::new(OWN);
    let n = 5u32;
    for key in 0..n {
        dir.publish(10, 0, 9, Scope::Cluster, 1000 + key, key).unwrap();
    }

    // Two full cycles: every binding exactly once per cycle.
    for cycle in 0..2 {
        let mut ports: Vec<u32> = (0..n).map(|_| dir.translate(10, 3, None).unwrap().port).collect();
        ports.sort_unstable();
        assert_eq!(
            ports,
            (0..n).map(|k| 1000 + k).collect::<Vec<u32>>(),
            "cycle {} revisited a binding early",
            cycle
        );
    }
}

#[test]
fn closest_first_prefers_local_until_withdrawn() {
    let dir = ServiceDirectory::new(OWN);
    dir.insert_publication(10, 0, 9, Scope::Cluster, REMOTE, 200, 1)
        .unwrap();
    dir.publish(10, 0, 9, Scope::Cluster, 100, 2).unwrap();

    for _ in 0..6 {
        assert_eq!(dir.translate(10, 4, None).unwrap().node, OWN);
    }

    dir.withdraw(10, 4, 100, 2).unwrap();
    assert_eq!(dir.translate(10, 4, None).unwrap().node, REMOTE);
}

#[test]
fn own_node_destination_must_resolve_locally() {
    let dir = ServiceDirectory::new(OWN);
    dir.insert_publication(10, 0, 9, Scope::Cluster, REMOTE, 200, 1)
        .unwrap();

    // The full list is non-empty, but a local destination needs a local binding.
    assert_eq!(dir.translate(10, 4, Some(OWN)), None);

    dir.publish(10, 0, 9, Scope::Cluster, 100, 2).unwrap();
    assert_eq!(dir.translate(10, 4, Some(OWN)), Some(Binding::new(OWN, 100)));
}

#[test]
fn explicit_remote_destination_uses_full_list() {
    let dir = ServiceDirectory::new(OWN);
    dir.insert_publication(10, 0, 9, Scope::Cluster, REMOTE, 200, 1)
        .unwrap();
    dir.insert_publication(10, 0, 9, Scope::Cluster, 0x0303, 201, 2)
        .unwrap();

    let mut nodes = Vec::new();
    for _ in 0..2 {
        nodes.push(dir.translate(10, 4, Some(0x0404)).unwrap().node);
    }
    nodes.sort_unstable();
    assert_eq!(nodes, vec![REMOTE, 0x0303], "full list is round-robined");
}

#[test]
fn anycast_lookup_round_robins_single_matches() {
    let dir = ServiceDirectory::new(OWN);
    dir.insert_publication(10, 0, 9, Scope::Cluster, REMOTE, 200, 1)
        .unwrap();
    dir.insert_publication(10, 0, 9, Scope::Cluster, 0x0303, 201, 2)
        .unwrap();
    dir.insert_publication(10, 0, 9, Scope::Cluster, 0x0404, 202, 3)
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let dests = dir.lookup(10, 4, Scope::Cluster, 0, false);
        assert_eq!(dests.len(), 1);
        seen.push(dests.iter().next().unwrap().port);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![200, 201, 202]);
}

#[test]
fn anycast_lookup_all_collects_every_match() {
    let dir = ServiceDirectory::new(OWN);
    dir.publish(10, 0, 9, Scope::Cluster, 100, 1).unwrap();
    dir.insert_publication(10, 0, 9, Scope::Cluster, REMOTE, 200, 2)
        .unwrap();
    dir.insert_publication(10, 0, 9, Scope::Node, 0x0303, 201, 3)
        .unwrap();

    // Scope must match exactly; the Node-scope binding is ignored.
    let dests = dir.lookup(10, 4, Scope::Cluster, 0, true);
    assert_eq!(dests.len(), 2);
    assert!(dests.contains(OWN, 100));
    assert!(dests.contains(REMOTE, 200));
}
