//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::Bytes;
use ipnetwork::Ipv4Network;

// External collaborators of the routing engine.
//
// The packet substrate and the kernel forwarding table live outside the
// instance; the engine only ever talks to them through this trait. Drivers
// (daemons, simulations) provide the implementation.
pub trait Southbound {
    // Sends a protocol packet out the given interface. The destination is
    // either the all-routers multicast address or a neighbor unicast
    // address.
    fn send_packet(&mut self, ifindex: u32, dst: Ipv4Addr, data: Bytes);

    // Installs a host/subnet route into the forwarding table.
    fn add_host_route(
        &mut self,
        prefix: Ipv4Network,
        nexthop: Ipv4Addr,
        ifindex: u32,
        metric: u32,
    );

    // Removes a previously installed route.
    fn remove_host_route(&mut self, prefix: Ipv4Network);

    // Installs a multicast route accepting `group` on `input_ifindex`.
    fn add_multicast_route(
        &mut self,
        group: Ipv4Addr,
        input_ifindex: u32,
        output_ifindexes: &[u32],
    );

    // Returns the operational status of an interface.
    fn interface_is_up(&self, ifindex: u32) -> bool;
}
