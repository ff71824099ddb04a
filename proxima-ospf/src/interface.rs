//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use proxima_utils::ip;
use proxima_utils::timer::TimerHandle;

use crate::debug::Debug;
use crate::error::InterfaceCfgError;
use crate::instance::InstanceUpView;
use crate::packet::Hello;
use crate::southbound::Southbound;
use crate::tasks;

#[derive(Debug)]
pub struct Interface {
    // Interface index assigned by the packet substrate.
    pub ifindex: u32,
    // Local address and mask.
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    // Area this interface belongs to.
    pub area_id: Ipv4Addr,
    // Link metric.
    pub metric: u16,
    // True while the instance is enabled.
    pub enabled: bool,
    // Operational status reported by the packet substrate.
    pub system_up: bool,
    // Number of Hello packets transmitted.
    pub hello_tx_count: u64,
    pub tasks: InterfaceTasks,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub hello_interval: Option<TimerHandle>,
}

// Interface collection keyed by interface index.
#[derive(Debug, Default)]
pub struct Interfaces(BTreeMap<u32, Interface>);

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(
        ifindex: u32,
        addr: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Interface {
        Debug::InterfaceAttach(ifindex).log();

        Interface {
            ifindex,
            addr,
            mask,
            area_id: Ipv4Addr::UNSPECIFIED,
            metric: 1,
            enabled: false,
            system_up: false,
            hello_tx_count: 0,
            tasks: Default::default(),
        }
    }

    // An interface participates in the protocol only while the instance is
    // enabled and the link is operationally up.
    pub(crate) fn is_ready(&self) -> bool {
        self.enabled && self.system_up
    }

    // Returns the connected network of this interface.
    pub(crate) fn network(&self) -> Option<Ipv4Network> {
        ip::network_from_mask(self.addr, self.mask)
    }

    pub(crate) fn hello_interval_start<S>(
        &mut self,
        instance: &mut InstanceUpView<'_, S>,
        first_delay: std::time::Duration,
    ) where
        S: Southbound,
    {
        let handle = tasks::hello_interval(
            instance.timers,
            instance.now,
            first_delay,
            self.ifindex,
        );
        if let Some(old) = self.tasks.hello_interval.replace(handle) {
            instance.timers.cancel(old);
        }
    }

    pub(crate) fn hello_interval_stop<S>(
        &mut self,
        instance: &mut InstanceUpView<'_, S>,
    ) where
        S: Southbound,
    {
        if let Some(timer) = self.tasks.hello_interval.take() {
            instance.timers.cancel(timer);
        }
    }

    // Sanity checks performed on every received Hello (RFC 2328 10.5).
    pub(crate) fn validate_hello(
        &self,
        hello: &Hello,
        dead_interval: u32,
        hello_interval: u16,
    ) -> Result<(), InterfaceCfgError> {
        // Check for network mask mismatch.
        if hello.network_mask != self.mask {
            return Err(InterfaceCfgError::HelloMaskMismatch(
                hello.network_mask,
                self.mask,
            ));
        }

        // Check for HelloInterval mismatch.
        if hello.hello_interval != hello_interval {
            return Err(InterfaceCfgError::HelloIntervalMismatch(
                hello.hello_interval,
                hello_interval,
            ));
        }

        // Check for RouterDeadInterval mismatch.
        if hello.dead_interval != dead_interval {
            return Err(InterfaceCfgError::DeadIntervalMismatch(
                hello.dead_interval,
                dead_interval,
            ));
        }

        Ok(())
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn insert(&mut self, iface: Interface) -> &mut Interface {
        use std::collections::btree_map::Entry;

        match self.0.entry(iface.ifindex) {
            Entry::Occupied(mut o) => {
                o.insert(iface);
                o.into_mut()
            }
            Entry::Vacant(v) => v.insert(iface),
        }
    }

    pub fn get(&self, ifindex: u32) -> Option<&Interface> {
        self.0.get(&ifindex)
    }

    pub(crate) fn get_mut(&mut self, ifindex: u32) -> Option<&mut Interface> {
        self.0.get_mut(&ifindex)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> + '_ {
        self.0.values()
    }

    pub(crate) fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut Interface> + '_ {
        self.0.values_mut()
    }

    pub fn indexes(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
