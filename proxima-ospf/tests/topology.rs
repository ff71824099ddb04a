//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use maplit::btreemap;
use proxima_ospf::instance::InstanceCfg;

use crate::common::TestNet;

fn test_config() -> InstanceCfg {
    InstanceCfg {
        hello_interval: Duration::from_secs(10),
        dead_interval: Duration::from_secs(30),
        rxmt_interval: Duration::from_secs(5),
        ..Default::default()
    }
}

// Three-node chain: full LSDB convergence and transit routing through the
// middle router.
#[test]
fn chain_converges() {
    let mut net = TestNet::new(3, test_config());
    net.link(0, 1);
    net.link(1, 2);
    net.enable_all();

    net.run_to(Duration::from_secs(60));

    // Every node holds a Router-LSA from every other node.
    let hashes = net
        .routers
        .iter()
        .map(|router| {
            assert_eq!(router.router_lsdb().count(), 3);
            router.lsdb_hash()
        })
        .collect::<Vec<_>>();
    assert!(hashes.iter().all(|hash| *hash == hashes[0]));

    // Router 0 reaches the far subnet through router 1.
    let far_subnet = net.link_subnet(1);
    let route = net.routers[0]
        .routing_table()
        .get(&far_subnet)
        .copied()
        .expect("missing route to the far subnet");
    assert_eq!(route.nexthop, Some(net.addr_of(1, 0)));
    assert_eq!(route.metric, 2);

    // The route also made it into the forwarding table.
    assert!(net.routers[0].sb.fib.contains_key(&far_subnet));
}

// Four-node chain with the middle link failing and recovering: the far
// route disappears and comes back with its original metric.
#[test]
fn link_failure_and_recovery() {
    let mut net = TestNet::new(4, test_config());
    net.link(0, 1);
    net.link(1, 2);
    net.link(2, 3);
    net.enable_all();

    let far_subnet = net.link_subnet(2);

    net.run_to(Duration::from_secs(30));
    let route = net.routers[1]
        .routing_table()
        .get(&far_subnet)
        .copied()
        .expect("missing route before the failure");
    let metric_before = route.metric;
    assert_eq!(metric_before, 2);

    // Fail the middle link.
    net.set_link(1, 2, false);
    net.run_to(Duration::from_secs(40));
    assert!(
        net.routers[1].routing_table().get(&far_subnet).is_none(),
        "route must be withdrawn while the link is down"
    );
    assert!(!net.routers[1].sb.fib.contains_key(&far_subnet));

    // Restore it.
    net.set_link(1, 2, true);
    net.run_to(Duration::from_secs(80));
    let route = net.routers[1]
        .routing_table()
        .get(&far_subnet)
        .copied()
        .expect("missing route after recovery");
    assert_eq!(route.metric, metric_before);
    assert_eq!(route.nexthop, Some(net.addr_of(2, 1)));
}

// 2x10 grid: identical Router-LSDB hashes everywhere, and every stored
// Router-LSA describes exactly one point-to-point link plus one stub link
// per adjacency.
#[test]
fn grid_converges() {
    let rows = 2;
    let cols = 10;
    let mut net = TestNet::new(rows * cols, test_config());

    let node = |r: usize, c: usize| r * cols + c;
    let mut degree = vec![0usize; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            if c + 1 < cols {
                net.link(node(r, c), node(r, c + 1));
                degree[node(r, c)] += 1;
                degree[node(r, c + 1)] += 1;
            }
            if r + 1 < rows {
                net.link(node(r, c), node(r + 1, c));
                degree[node(r, c)] += 1;
                degree[node(r + 1, c)] += 1;
            }
        }
    }
    net.enable_all();

    net.run_to(Duration::from_secs(100));

    let hashes = net
        .routers
        .iter()
        .map(|router| router.lsdb_hash())
        .collect::<Vec<_>>();
    assert!(hashes.iter().all(|hash| *hash == hashes[0]));

    // Check the converged database on one node against the topology.
    for (i, &expected_degree) in degree.iter().enumerate() {
        let router_id = common::router_id(i);
        let (_, lse) = net.routers[0]
            .router_lsdb()
            .find(|(key, _)| key.adv_rtr == router_id)
            .expect("missing Router-LSA");
        let body = lse.data.body.as_router().unwrap();
        // One point-to-point link and one stub link per interface.
        assert_eq!(body.links.len(), 2 * expected_degree);
    }
}

// Three areas in a chain with the area-proxy extension: inter-area routes
// resolve through the border toward the next area.
#[test]
fn area_proxy_chain() {
    let config = InstanceCfg {
        enable_area_proxy: true,
        ..test_config()
    };
    let mut net = TestNet::new(3, config);
    net.link(0, 1);
    net.link(1, 2);

    let areas = btreemap! {
        0 => Ipv4Addr::new(0, 0, 0, 0),
        1 => Ipv4Addr::new(0, 0, 0, 1),
        2 => Ipv4Addr::new(0, 0, 0, 2),
    };
    for (&router, &area_id) in &areas {
        net.set_node_area(router, area_id);
    }
    net.enable_all();
    for (&router, &area_id) in &areas {
        let now = net.now;
        net.routers[router].add_all_reachable_addresses(now, area_id);
    }

    net.run_to(Duration::from_secs(100));

    // Single-router areas lead themselves.
    for router in &net.routers {
        assert!(router.is_area_leader());
        assert!(router.l1_summary_lsdb().count() > 0);
        assert_eq!(router.area_lsdb().count(), 3);
        assert_eq!(router.l2_summary_lsdb().count(), 3);
    }

    // Node 0 reaches node 2's prefix with a nexthop pointing toward node
    // 1.
    let far_subnet = net.link_subnet(1);
    let route = net.routers[0]
        .routing_table()
        .get(&far_subnet)
        .copied()
        .expect("missing inter-area route");
    assert_eq!(route.nexthop, Some(net.addr_of(1, 0)));
    let (ifindex, _) = net.ifindexes(0, 1);
    assert_eq!(route.ifindex, ifindex);
}

// Four-node ring: an interface-down event bumps the Router-LSA sequence
// number, and the new instance floods to every other node.
#[test]
fn ring_interface_down_bumps_sequence() {
    let mut net = TestNet::new(4, test_config());
    net.link(0, 1);
    net.link(1, 2);
    net.link(2, 3);
    net.link(3, 0);
    net.enable_all();

    net.run_to(Duration::from_secs(20));
    let router_id = common::router_id(0);
    let seq_before = net.routers[0]
        .router_lsdb()
        .find(|(key, _)| key.adv_rtr == router_id)
        .map(|(_, lse)| lse.data.hdr.seq_no)
        .unwrap();

    let (ifindex, _) = net.ifindexes(0, 1);
    net.set_iface(0, ifindex, false);

    net.run_to(Duration::from_secs(35));
    let seq_after = net.routers[0]
        .router_lsdb()
        .find(|(key, _)| key.adv_rtr == router_id)
        .map(|(_, lse)| lse.data.hdr.seq_no)
        .unwrap();
    assert!(
        (seq_after as i32) > (seq_before as i32),
        "sequence number must increment after the interface goes down"
    );

    // Every other node observes the new instance.
    for router in &net.routers[1..] {
        let seq = router
            .router_lsdb()
            .find(|(key, _)| key.adv_rtr == router_id)
            .map(|(_, lse)| lse.data.hdr.seq_no)
            .unwrap();
        assert_eq!(seq, seq_after);
    }
}

// Enable/Disable: the Hello counter only moves while the instance is
// enabled with an operational interface.
#[test]
fn enable_disable_hello_counters() {
    let mut net = TestNet::new(2, test_config());
    net.link(0, 1);
    net.enable_all();

    net.run_to(Duration::from_secs(25));
    let after_enable = net.routers[0].hello_tx_count();
    assert!(after_enable >= 3);

    // Disabled: the counter must not move.
    net.routers[0].disable();
    net.routers[0].disable();
    net.run_to(Duration::from_secs(55));
    assert_eq!(net.routers[0].hello_tx_count(), after_enable);

    // Re-enabled with the interface up: the counter moves again.
    let now = net.now;
    net.routers[0].enable(now);
    net.run_to(Duration::from_secs(85));
    let after_reenable = net.routers[0].hello_tx_count();
    assert!(after_reenable > after_enable);

    // Re-enabled while the sole interface is down: no Hellos.
    net.routers[0].disable();
    let (ifindex, _) = net.ifindexes(0, 1);
    net.set_iface_silent(0, ifindex, false);
    let now = net.now;
    net.routers[0].enable(now);
    net.run_to(Duration::from_secs(120));
    assert_eq!(net.routers[0].hello_tx_count(), after_reenable);
}
