//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::{Ipv4Network, ipv4_mask_to_prefix};

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Converts this IPv4 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv4Network;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    // Applies the network mask to the network address.
    fn apply_mask(&self) -> Ipv4Network;

    // Returns true if this is a host prefix.
    fn is_host_prefix(&self) -> bool;
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !self.is_loopback() && !self.is_broadcast() && !self.is_unspecified()
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, Self::LENGTH as u8 * 8).unwrap()
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == 32
    }
}

// ===== global functions =====

// Builds a masked network from an address and a dotted-quad network mask.
//
// Returns `None` when the mask is non-contiguous.
pub fn network_from_mask(
    addr: Ipv4Addr,
    mask: Ipv4Addr,
) -> Option<Ipv4Network> {
    let plen = ipv4_mask_to_prefix(mask).ok()?;
    let net = Ipv4Network::new(addr, plen).ok()?;
    Some(net.apply_mask())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_from_contiguous_mask() {
        let net = network_from_mask(
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap();
        assert_eq!(net.ip(), Ipv4Addr::new(10, 1, 2, 0));
        assert_eq!(net.prefix(), 24);
    }

    #[test]
    fn network_from_invalid_mask() {
        assert_eq!(
            network_from_mask(
                Ipv4Addr::new(10, 1, 2, 3),
                Ipv4Addr::new(255, 0, 255, 0),
            ),
            None
        );
    }
}
