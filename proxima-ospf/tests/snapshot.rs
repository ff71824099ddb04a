//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::time::Duration;

use proxima_ospf::instance::InstanceCfg;

use crate::common::{TestNet, temp_dir};

fn test_config() -> InstanceCfg {
    InstanceCfg {
        hello_interval: Duration::from_secs(10),
        dead_interval: Duration::from_secs(30),
        ..Default::default()
    }
}

#[test]
fn metadata_round_trip() {
    let dir = temp_dir("metadata");
    let mut net = TestNet::new(2, test_config());
    net.link(0, 1);

    let now = net.now;
    net.routers[0].set_area_leader(now, true);
    net.routers[0].export_metadata(&dir, "node.meta").unwrap();

    // The leader flag is serialized as four big-endian bytes.
    let bytes = std::fs::read(dir.join("node.meta")).unwrap();
    assert_eq!(bytes, vec![0, 0, 0, 1]);

    // Restoring onto a non-leader flips the flag.
    assert!(!net.routers[1].is_area_leader());
    net.routers[1].import_metadata(&dir, "node.meta").unwrap();
    assert!(net.routers[1].is_area_leader());
}

#[test]
fn metadata_truncated_leaves_state_unchanged() {
    let dir = temp_dir("metadata-trunc");
    let mut net = TestNet::new(1, test_config());

    std::fs::write(dir.join("bad.meta"), []).unwrap();

    let now = net.now;
    net.routers[0].set_area_leader(now, true);
    assert!(net.routers[0].import_metadata(&dir, "bad.meta").is_err());
    assert!(net.routers[0].is_area_leader());
}

#[test]
fn prefixes_import_empty_file_is_rejected() {
    let dir = temp_dir("prefixes-empty");
    let mut net = TestNet::new(3, test_config());
    net.link(0, 1);
    net.link(1, 2);
    net.enable_all();
    net.run_to(Duration::from_secs(60));

    net.routers[0]
        .export_prefixes(&dir, "before.prefixes")
        .unwrap();
    let before = std::fs::read(dir.join("before.prefixes")).unwrap();
    assert!(!net.routers[0].routing_table().is_empty());

    // An empty file must leave the routing table unchanged.
    std::fs::write(dir.join("empty.prefixes"), []).unwrap();
    assert!(
        net.routers[0]
            .import_prefixes(&dir, "empty.prefixes")
            .is_err()
    );

    net.routers[0]
        .export_prefixes(&dir, "after.prefixes")
        .unwrap();
    let after = std::fs::read(dir.join("after.prefixes")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn prefixes_truncated_record_is_rejected() {
    let dir = temp_dir("prefixes-trunc");
    let mut net = TestNet::new(1, test_config());

    // routeNum = 1, but no route records follow.
    std::fs::write(dir.join("bad.prefixes"), [0, 0, 0, 1]).unwrap();
    assert!(
        net.routers[0]
            .import_prefixes(&dir, "bad.prefixes")
            .is_err()
    );
    assert!(net.routers[0].routing_table().is_empty());
}

#[test]
fn prefixes_round_trip() {
    let dir = temp_dir("prefixes");
    let mut net = TestNet::new(3, test_config());
    net.link(0, 1);
    net.link(1, 2);
    net.enable_all();
    net.run_to(Duration::from_secs(60));

    net.routers[0].export_prefixes(&dir, "node.prefixes").unwrap();

    // Import into a pristine router of the same shape.
    let mut other = TestNet::new(1, test_config());
    other.routers[0]
        .import_prefixes(&dir, "node.prefixes")
        .unwrap();
    assert_eq!(
        other.routers[0].routing_table().keys().collect::<Vec<_>>(),
        net.routers[0].routing_table().keys().collect::<Vec<_>>(),
    );
}

#[test]
fn neighbors_round_trip() {
    let dir = temp_dir("neighbors");
    let mut net = TestNet::new(3, test_config());
    net.link(0, 1);
    net.link(1, 2);
    net.enable_all();
    net.run_to(Duration::from_secs(60));

    net.routers[1]
        .export_neighbors(&dir, "node.neighbors")
        .unwrap();

    // Same interface layout, no protocol activity yet.
    let mut other = TestNet::new(3, test_config());
    other.link(0, 1);
    other.link(1, 2);
    let now = other.now;
    other.routers[1]
        .import_neighbors(now, &dir, "node.neighbors")
        .unwrap();

    let restored = other.routers[1]
        .arenas
        .neighbors
        .iter()
        .map(|(_, nbr)| (nbr.router_id, nbr.state))
        .collect::<Vec<_>>();
    let original = net.routers[1]
        .arenas
        .neighbors
        .iter()
        .map(|(_, nbr)| (nbr.router_id, nbr.state))
        .collect::<Vec<_>>();
    assert_eq!(restored, original);
}

#[test]
fn neighbors_interface_mismatch_is_rejected() {
    let dir = temp_dir("neighbors-mismatch");
    let mut net = TestNet::new(2, test_config());
    net.link(0, 1);

    // nInterfaces = 0 against one bound interface.
    std::fs::write(dir.join("bad.neighbors"), [0, 0, 0, 0]).unwrap();
    let now = net.now;
    assert!(
        net.routers[0]
            .import_neighbors(now, &dir, "bad.neighbors")
            .is_err()
    );
    assert!(net.routers[0].arenas.neighbors.is_empty());
}

#[test]
fn lsdb_round_trip() {
    let dir = temp_dir("lsdb");
    let mut net = TestNet::new(3, test_config());
    net.link(0, 1);
    net.link(1, 2);
    net.enable_all();
    net.run_to(Duration::from_secs(60));

    net.routers[0].export_lsdb(&dir, "node.lsdb").unwrap();

    let mut other = TestNet::new(1, test_config());
    let now = other.now;
    other.routers[0].import_lsdb(now, &dir, "node.lsdb").unwrap();

    assert_eq!(
        other.routers[0].lsdb().len(),
        net.routers[0].lsdb().len()
    );
    assert_eq!(other.routers[0].lsdb_hash(), net.routers[0].lsdb_hash());
}

#[test]
fn lsdb_truncated_leaves_database_unchanged() {
    let dir = temp_dir("lsdb-trunc");
    let mut net = TestNet::new(1, test_config());

    std::fs::write(dir.join("empty.lsdb"), []).unwrap();
    let now = net.now;
    net.routers[0].import_lsdb(now, &dir, "empty.lsdb").unwrap();
    assert!(net.routers[0].lsdb().is_empty());

    std::fs::write(dir.join("trunc.lsdb"), [0x01]).unwrap();
    let now = net.now;
    assert!(
        net.routers[0]
            .import_lsdb(now, &dir, "trunc.lsdb")
            .is_err()
    );
    assert!(net.routers[0].lsdb().is_empty());
}
