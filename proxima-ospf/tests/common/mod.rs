//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

//! Discrete-event test harness: a handful of router instances wired over
//! simulated point-to-point links with a fixed propagation delay.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ipnetwork::Ipv4Network;
use proxima_ospf::instance::{Instance, InstanceCfg};
use proxima_ospf::southbound::Southbound;

// Propagation delay of every simulated link.
pub const LINK_DELAY: Duration = Duration::from_millis(1);

// Packet in flight toward a router.
struct Delivery {
    router: usize,
    ifindex: u32,
    src: Ipv4Addr,
    data: Bytes,
}

// Shared state of the simulated network.
pub struct World {
    now: Instant,
    seq: u64,
    queue: BinaryHeap<Reverse<(Instant, u64)>>,
    pending: HashMap<u64, Delivery>,
    iface_up: HashMap<(usize, u32), bool>,
    links: HashMap<(usize, u32), (usize, u32)>,
    addrs: HashMap<(usize, u32), Ipv4Addr>,
}

impl World {
    fn new(now: Instant) -> World {
        World {
            now,
            seq: 0,
            queue: BinaryHeap::new(),
            pending: HashMap::new(),
            iface_up: HashMap::new(),
            links: HashMap::new(),
            addrs: HashMap::new(),
        }
    }

    fn transmit(&mut self, router: usize, ifindex: u32, data: Bytes) {
        // Frames are lost unless both endpoints are up.
        if !self.iface_up.get(&(router, ifindex)).copied().unwrap_or(false) {
            return;
        }
        let Some(&(peer, peer_ifindex)) = self.links.get(&(router, ifindex))
        else {
            return;
        };
        if !self
            .iface_up
            .get(&(peer, peer_ifindex))
            .copied()
            .unwrap_or(false)
        {
            return;
        }

        let src = self.addrs[&(router, ifindex)];
        let id = self.seq;
        self.seq += 1;
        self.pending.insert(
            id,
            Delivery {
                router: peer,
                ifindex: peer_ifindex,
                src,
                data,
            },
        );
        self.queue.push(Reverse((self.now + LINK_DELAY, id)));
    }

    fn next_delivery(&self) -> Option<Instant> {
        self.queue.peek().map(|Reverse((when, _))| *when)
    }

    fn pop_due(&mut self, now: Instant) -> Vec<Delivery> {
        let mut due = vec![];
        while let Some(Reverse((when, id))) = self.queue.peek().copied() {
            if when > now {
                break;
            }
            self.queue.pop();
            if let Some(delivery) = self.pending.remove(&id) {
                due.push(delivery);
            }
        }
        due
    }
}

// Per-router southbound implementation backed by the shared world.
pub struct TestSb {
    router: usize,
    world: Rc<RefCell<World>>,
    // Kernel-facing forwarding table: prefix -> (nexthop, ifindex, metric).
    pub fib: BTreeMap<Ipv4Network, (Ipv4Addr, u32, u32)>,
    pub multicast_groups: Vec<(Ipv4Addr, u32)>,
}

impl Southbound for TestSb {
    fn send_packet(&mut self, ifindex: u32, _dst: Ipv4Addr, data: Bytes) {
        self.world.borrow_mut().transmit(self.router, ifindex, data);
    }

    fn add_host_route(
        &mut self,
        prefix: Ipv4Network,
        nexthop: Ipv4Addr,
        ifindex: u32,
        metric: u32,
    ) {
        self.fib.insert(prefix, (nexthop, ifindex, metric));
    }

    fn remove_host_route(&mut self, prefix: Ipv4Network) {
        self.fib.remove(&prefix);
    }

    fn add_multicast_route(
        &mut self,
        group: Ipv4Addr,
        input_ifindex: u32,
        _output_ifindexes: &[u32],
    ) {
        self.multicast_groups.push((group, input_ifindex));
    }

    fn interface_is_up(&self, ifindex: u32) -> bool {
        self.world
            .borrow()
            .iface_up
            .get(&(self.router, ifindex))
            .copied()
            .unwrap_or(false)
    }
}

// A simulated network of routers.
pub struct TestNet {
    pub routers: Vec<Instance<TestSb>>,
    world: Rc<RefCell<World>>,
    start: Instant,
    pub now: Instant,
    next_ifindex: Vec<u32>,
    next_subnet: u8,
    // (a, ifindex_a, b, ifindex_b) per link, in creation order.
    pub links: Vec<(usize, u32, usize, u32)>,
}

impl TestNet {
    pub fn new(n: usize, config: InstanceCfg) -> TestNet {
        // Honor RUST_LOG when debugging a failing scenario.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let start = Instant::now();
        let world = Rc::new(RefCell::new(World::new(start)));

        let routers = (0..n)
            .map(|i| {
                let sb = TestSb {
                    router: i,
                    world: world.clone(),
                    fib: BTreeMap::new(),
                    multicast_groups: vec![],
                };
                Instance::new(router_id(i), config.clone(), sb)
            })
            .collect();

        TestNet {
            routers,
            world,
            start,
            now: start,
            next_ifindex: vec![1; n],
            next_subnet: 1,
            links: vec![],
        }
    }

    // Wires a point-to-point link between two routers, binding a fresh
    // interface on each.
    pub fn link(&mut self, a: usize, b: usize) -> (u32, u32) {
        let subnet = self.next_subnet;
        self.next_subnet += 1;
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let addr_a = Ipv4Addr::new(10, 1, subnet, 1);
        let addr_b = Ipv4Addr::new(10, 1, subnet, 2);

        let ifindex_a = self.next_ifindex[a];
        self.next_ifindex[a] += 1;
        let ifindex_b = self.next_ifindex[b];
        self.next_ifindex[b] += 1;

        {
            let mut world = self.world.borrow_mut();
            world.links.insert((a, ifindex_a), (b, ifindex_b));
            world.links.insert((b, ifindex_b), (a, ifindex_a));
            world.addrs.insert((a, ifindex_a), addr_a);
            world.addrs.insert((b, ifindex_b), addr_b);
            world.iface_up.insert((a, ifindex_a), true);
            world.iface_up.insert((b, ifindex_b), true);
        }

        let now = self.now;
        self.routers[a].attach_interface(now, ifindex_a, addr_a, mask);
        self.routers[b].attach_interface(now, ifindex_b, addr_b, mask);

        self.links.push((a, ifindex_a, b, ifindex_b));
        (ifindex_a, ifindex_b)
    }

    // The subnet assigned to the n-th created link.
    pub fn link_subnet(&self, link: usize) -> Ipv4Network {
        Ipv4Network::new(
            Ipv4Addr::new(10, 1, link as u8 + 1, 0),
            24,
        )
        .unwrap()
    }

    // Address of `router` on its link with `peer`.
    pub fn addr_of(&self, router: usize, peer: usize) -> Ipv4Addr {
        let (ifindex, _) = self.ifindexes(router, peer);
        self.world.borrow().addrs[&(router, ifindex)]
    }

    // Interface indexes of the link between two routers.
    pub fn ifindexes(&self, a: usize, b: usize) -> (u32, u32) {
        for &(la, ia, lb, ib) in &self.links {
            if (la, lb) == (a, b) {
                return (ia, ib);
            }
            if (la, lb) == (b, a) {
                return (ib, ia);
            }
        }
        panic!("no link between router {} and router {}", a, b);
    }

    pub fn enable_all(&mut self) {
        let now = self.now;
        for router in &mut self.routers {
            router.enable(now);
        }
    }

    pub fn set_node_area(&mut self, router: usize, area_id: Ipv4Addr) {
        let now = self.now;
        let ifindexes = self.routers[router]
            .arenas
            .interfaces
            .indexes()
            .collect::<Vec<_>>();
        for ifindex in ifindexes {
            self.routers[router].set_area(now, ifindex, area_id);
        }
    }

    // Takes both endpoints of a link up or down and notifies the routers.
    pub fn set_link(&mut self, a: usize, b: usize, up: bool) {
        let (ifindex_a, ifindex_b) = self.ifindexes(a, b);
        {
            let mut world = self.world.borrow_mut();
            world.iface_up.insert((a, ifindex_a), up);
            world.iface_up.insert((b, ifindex_b), up);
        }
        let now = self.now;
        self.routers[a].interface_update(now, ifindex_a, up);
        self.routers[b].interface_update(now, ifindex_b, up);
    }

    // Takes a single endpoint down, leaving the peer unaware.
    pub fn set_iface(&mut self, router: usize, ifindex: u32, up: bool) {
        self.world
            .borrow_mut()
            .iface_up
            .insert((router, ifindex), up);
        let now = self.now;
        self.routers[router].interface_update(now, ifindex, up);
    }

    // Marks the interface state in the world without notifying the router.
    pub fn set_iface_silent(&mut self, router: usize, ifindex: u32, up: bool) {
        self.world
            .borrow_mut()
            .iface_up
            .insert((router, ifindex), up);
    }

    // Advances simulated time to `offset` past the start, processing every
    // packet delivery and timer in order.
    pub fn run_to(&mut self, offset: Duration) {
        let until = self.start + offset;

        loop {
            let mut next = self.world.borrow().next_delivery();
            for router in &mut self.routers {
                next = match (next, router.next_timeout()) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            }

            let Some(when) = next else {
                break;
            };
            if when > until {
                break;
            }

            self.now = when;
            self.world.borrow_mut().now = when;

            let deliveries = self.world.borrow_mut().pop_due(when);
            for delivery in deliveries {
                self.routers[delivery.router].process_packet(
                    when,
                    delivery.ifindex,
                    delivery.src,
                    &delivery.data,
                );
            }
            for router in &mut self.routers {
                router.process_timers(when);
            }
        }

        self.now = until;
        self.world.borrow_mut().now = until;
    }
}

// Router-IDs are allocated in index order, so router 0 always holds the
// numerically smallest one.
pub fn router_id(i: usize) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, i as u8 + 1)
}

// Scratch directory for snapshot tests.
pub fn temp_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "proxima-test-{}-{}",
        tag,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
