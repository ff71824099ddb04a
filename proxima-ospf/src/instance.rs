//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use proxima_utils::timer::{TimerHandle, TimerWheel};

use crate::debug::{Debug, LsaFlushReason};
use crate::error::Error;
use crate::events;
use crate::interface::{Interface, Interfaces};
use crate::leader::{self, LeaderState};
use crate::lsdb::{self, Lsdb, LsaEntry};
use crate::neighbor::{Neighbors, nsm};
use crate::packet::lsa::{LsaKey, LsaType};
use crate::route::{self, RouteNet};
use crate::snapshot;
use crate::southbound::Southbound;
use crate::spf::{self, AreaSptNode, SptNode};
use crate::tasks::{self, LsaOrigKind, TimerMsg};

// Instance configuration.
//
// Defaults follow the conventional OSPFv2 values; drivers override them
// before enabling the instance.
#[derive(Clone, Debug)]
pub struct InstanceCfg {
    pub hello_address: Ipv4Addr,
    pub hello_interval: Duration,
    pub dead_interval: Duration,
    pub rxmt_interval: Duration,
    pub initial_hello_delay: Duration,
    pub area_mask: Ipv4Addr,
    pub auto_sync_interfaces: bool,
    pub interface_sync_interval: Duration,
    pub enable_area_proxy: bool,
    pub spf_delay: Duration,
    pub spf_hold_down: Duration,
}

// Area gateway configuration: egress interfaces and the upstream nexthop.
#[derive(Clone, Debug)]
pub struct GatewayCfg {
    pub ifindexes: Vec<u32>,
    pub nexthop: Ipv4Addr,
}

// Origination throttle of one self-originated LSA kind.
#[derive(Debug)]
pub struct OrigThrottle {
    pub last_orig: Option<Instant>,
    pub interval: Duration,
    pub delayed: Option<TimerHandle>,
}

// Instance state.
#[derive(Debug)]
pub struct InstanceState {
    pub router_id: Ipv4Addr,
    pub home_area: Ipv4Addr,
    pub enabled: bool,
    // Link state database.
    pub lsdb: Lsdb,
    // SPF scheduling and results.
    pub spf_delay_state: spf::fsm::State,
    pub spf_delay_timer: Option<TimerHandle>,
    pub spf_hold_down_timer: Option<TimerHandle>,
    pub spf_pending: bool,
    pub spt: BTreeMap<Ipv4Addr, SptNode>,
    pub area_spt: BTreeMap<Ipv4Addr, AreaSptNode>,
    // Routing table as currently installed.
    pub rib: BTreeMap<Ipv4Network, RouteNet>,
    // Area leader election.
    pub leader: LeaderState,
    // LSA origination bookkeeping.
    pub pending_orig: BTreeSet<LsaOrigKind>,
    pub orig_throttle: BTreeMap<LsaOrigKind, OrigThrottle>,
    // Locally advertised prefixes and gateway configuration.
    pub advertised_prefixes: BTreeSet<Ipv4Network>,
    pub gateway: Option<GatewayCfg>,
    // Housekeeping timers.
    pub lsdb_maxage_sweep_timer: Option<TimerHandle>,
    pub iface_sync_timer: Option<TimerHandle>,
    // Statistics.
    pub hello_tx_count: u64,
    pub rx_lsa_count: u32,
    pub orig_lsa_count: u32,
    pub rx_error_count: u32,
    pub spf_run_count: u32,
    pub discontinuity_time: DateTime<Utc>,
}

// Mutable collections owned by the instance.
#[derive(Debug, Default)]
pub struct InstanceArenas {
    pub interfaces: Interfaces,
    pub neighbors: Neighbors,
}

// View of the instance that handlers operate on, split from the arenas so
// interface and neighbor records can be borrowed alongside it.
pub struct InstanceUpView<'a, S: Southbound> {
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub timers: &'a mut TimerWheel<TimerMsg>,
    pub sb: &'a mut S,
    pub now: Instant,
}

// Routing engine instance: the single owner of all protocol state.
//
// All processing runs to completion inside the public methods; deferred
// work lives on the timer wheel and is drained by `process_timers`. The
// caller supplies the current time everywhere, which keeps the instance
// deterministic under simulated clocks.
#[derive(Debug)]
pub struct Instance<S: Southbound> {
    pub config: InstanceCfg,
    pub state: InstanceState,
    pub arenas: InstanceArenas,
    pub timers: TimerWheel<TimerMsg>,
    pub sb: S,
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            hello_address: Ipv4Addr::new(224, 0, 0, 5),
            hello_interval: Duration::from_secs(10),
            dead_interval: Duration::from_secs(40),
            rxmt_interval: Duration::from_secs(5),
            initial_hello_delay: Duration::ZERO,
            area_mask: Ipv4Addr::new(255, 255, 255, 0),
            auto_sync_interfaces: false,
            interface_sync_interval: Duration::from_secs(1),
            enable_area_proxy: false,
            spf_delay: Duration::from_millis(100),
            spf_hold_down: Duration::from_secs(1),
        }
    }
}

// ===== impl OrigThrottle =====

impl Default for OrigThrottle {
    fn default() -> OrigThrottle {
        OrigThrottle {
            last_orig: None,
            interval: events::LSA_ORIG_INTERVAL_MIN,
            delayed: None,
        }
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new(router_id: Ipv4Addr) -> InstanceState {
        InstanceState {
            router_id,
            home_area: Ipv4Addr::UNSPECIFIED,
            enabled: false,
            lsdb: Default::default(),
            spf_delay_state: Default::default(),
            spf_delay_timer: None,
            spf_hold_down_timer: None,
            spf_pending: false,
            spt: Default::default(),
            area_spt: Default::default(),
            rib: Default::default(),
            leader: Default::default(),
            pending_orig: Default::default(),
            orig_throttle: Default::default(),
            advertised_prefixes: Default::default(),
            gateway: None,
            lsdb_maxage_sweep_timer: None,
            iface_sync_timer: None,
            hello_tx_count: 0,
            rx_lsa_count: 0,
            orig_lsa_count: 0,
            rx_error_count: 0,
            spf_run_count: 0,
            discontinuity_time: Utc::now(),
        }
    }
}

// ===== impl Instance =====

impl<S> Instance<S>
where
    S: Southbound,
{
    pub fn new(router_id: Ipv4Addr, config: InstanceCfg, sb: S) -> Instance<S> {
        Instance {
            config,
            state: InstanceState::new(router_id),
            arenas: Default::default(),
            timers: TimerWheel::new(),
            sb,
        }
    }

    // Splits the instance into the handler view plus the arenas.
    fn split(
        &mut self,
        now: Instant,
    ) -> (InstanceUpView<'_, S>, &mut InstanceArenas) {
        (
            InstanceUpView {
                config: &self.config,
                state: &mut self.state,
                timers: &mut self.timers,
                sb: &mut self.sb,
                now,
            },
            &mut self.arenas,
        )
    }

    // ===== interface management =====

    // Binds an interface to the instance.
    pub fn attach_interface(
        &mut self,
        now: Instant,
        ifindex: u32,
        addr: Ipv4Addr,
        mask: Ipv4Addr,
    ) {
        let enabled = self.state.enabled;
        let (mut view, arenas) = self.split(now);

        let mut iface = Interface::new(ifindex, addr, mask);
        if enabled {
            iface.enabled = true;
            iface.system_up = view.sb.interface_is_up(ifindex);
        }
        let iface = arenas.interfaces.insert(iface);
        if iface.is_ready() {
            let hello_address = view.config.hello_address;
            let initial_delay = view.config.initial_hello_delay;
            view.sb.add_multicast_route(hello_address, ifindex, &[]);
            iface.hello_interval_start(&mut view, initial_delay);
        }

        self.update_home_area();
        self.state.pending_orig.insert(LsaOrigKind::Router);
        self.state.pending_orig.insert(LsaOrigKind::L1Summary);
        self.run_pending(now);
    }

    // Moves an interface into the given area.
    pub fn set_area(&mut self, now: Instant, ifindex: u32, area_id: Ipv4Addr) {
        if let Some(iface) = self.arenas.interfaces.get_mut(ifindex) {
            iface.area_id = area_id;
        }
        self.update_home_area();
        self.state.pending_orig.insert(LsaOrigKind::Router);
        self.run_pending(now);
    }

    // Updates the link metric of an interface.
    pub fn set_metric(&mut self, now: Instant, ifindex: u32, metric: u16) {
        if let Some(iface) = self.arenas.interfaces.get_mut(ifindex) {
            iface.metric = metric;
        }
        self.state.pending_orig.insert(LsaOrigKind::Router);
        self.run_pending(now);
    }

    // Adds every connected network of the given area, masked by the
    // configured area mask, to the advertised prefix set.
    pub fn add_all_reachable_addresses(&mut self, now: Instant, area_id: Ipv4Addr) {
        let area_mask = self.config.area_mask;
        let prefixes = self
            .arenas
            .interfaces
            .iter()
            .filter(|iface| iface.area_id == area_id)
            .filter_map(|iface| {
                proxima_utils::ip::network_from_mask(iface.addr, area_mask)
            })
            .collect::<Vec<_>>();
        self.state.advertised_prefixes.extend(prefixes);
        self.state.pending_orig.insert(LsaOrigKind::L1Summary);
        self.run_pending(now);
    }

    // Configures this router as an area gateway. The upstream nexthop is
    // installed directly and the default route is injected into the
    // L1-Summary so the rest of the area learns it.
    pub fn install_gateway(
        &mut self,
        now: Instant,
        ifindexes: &[u32],
        nexthop: Ipv4Addr,
    ) {
        self.state.gateway = Some(GatewayCfg {
            ifindexes: ifindexes.to_vec(),
            nexthop,
        });

        if let Some(&ifindex) = ifindexes.first() {
            let default = Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap();
            self.sb.add_host_route(default, nexthop, ifindex, 0);
            self.state.rib.insert(
                default,
                RouteNet {
                    path_type: route::PathType::IntraArea,
                    metric: 0,
                    nexthop: Some(nexthop),
                    ifindex,
                    flags: route::RouteNetFlags::INSTALLED,
                },
            );
        }

        self.state.pending_orig.insert(LsaOrigKind::L1Summary);
        self.run_pending(now);
    }

    // ===== lifecycle =====

    // Enables the instance: re-arms Hello emission and syncs interface
    // state from the current operational status. Idempotent.
    pub fn enable(&mut self, now: Instant) {
        if self.state.enabled {
            return;
        }
        self.state.enabled = true;
        Debug::InstanceEnable.log();

        let (mut view, arenas) = self.split(now);
        for iface in arenas.interfaces.iter_mut() {
            iface.enabled = true;
            iface.system_up = view.sb.interface_is_up(iface.ifindex);
            if iface.is_ready() {
                let hello_address = view.config.hello_address;
                let initial_delay = view.config.initial_hello_delay;
                view.sb.add_multicast_route(
                    hello_address,
                    iface.ifindex,
                    &[],
                );
                iface.hello_interval_start(&mut view, initial_delay);
            }
        }

        // A previous disable cleared the timer wheel; LSAs kept across the
        // outage need their aging and refresh timers back.
        lsdb::rearm_timers(&mut view);

        if view.config.auto_sync_interfaces {
            view.state.iface_sync_timer = Some(tasks::interface_sync_timer(
                view.timers,
                now,
                view.config.interface_sync_interval,
            ));
        }

        self.state.pending_orig.insert(LsaOrigKind::Router);
        self.state.pending_orig.insert(LsaOrigKind::L1Summary);
        self.run_pending(now);
    }

    // Disables the instance: cancels every pending timer and stops packet
    // emission. Idempotent.
    pub fn disable(&mut self) {
        if !self.state.enabled {
            return;
        }
        self.state.enabled = false;
        Debug::InstanceDisable.log();

        // Drop all deferred work at once; the stored handles are stale
        // afterwards and merely need to be forgotten.
        self.timers.clear();
        self.state.lsdb.clear_timer_handles();
        self.state.spf_delay_timer = None;
        self.state.spf_hold_down_timer = None;
        self.state.spf_pending = false;
        self.state.spf_delay_state = Default::default();
        self.state.leader.debounce_timer = None;
        self.state.lsdb_maxage_sweep_timer = None;
        self.state.iface_sync_timer = None;
        self.state.pending_orig.clear();
        for throttle in self.state.orig_throttle.values_mut() {
            throttle.delayed = None;
        }

        for iface in self.arenas.interfaces.iter_mut() {
            iface.enabled = false;
            iface.tasks.hello_interval = None;
        }

        // Neighbor liveness cannot be maintained while disabled.
        self.arenas.neighbors = Default::default();
    }

    // Testing hook: forces the area leadership flag.
    pub fn set_area_leader(&mut self, now: Instant, is_leader: bool) {
        let (mut view, arenas) = self.split(now);
        leader::force(&mut view, arenas, is_leader);
        self.run_pending(now);
    }

    // ===== event input =====

    // Feeds a received packet into the instance.
    pub fn process_packet(
        &mut self,
        now: Instant,
        ifindex: u32,
        src: Ipv4Addr,
        data: &[u8],
    ) {
        if !self.state.enabled {
            return;
        }

        let (mut view, arenas) = self.split(now);
        if let Err(error) =
            events::process_packet(&mut view, arenas, ifindex, src, data)
        {
            error.log();
        }
        self.run_pending(now);
    }

    // Applies an interface operational status change.
    pub fn interface_update(&mut self, now: Instant, ifindex: u32, up: bool) {
        let Some(iface) = self.arenas.interfaces.get(ifindex) else {
            return;
        };
        if iface.system_up == up {
            return;
        }
        if up {
            Debug::InterfaceUp(ifindex).log();
        } else {
            Debug::InterfaceDown(ifindex).log();
        }

        let (mut view, arenas) = self.split(now);
        if let Some(iface) = arenas.interfaces.get_mut(ifindex) {
            iface.system_up = up;
            if up {
                if iface.is_ready() {
                    let hello_address = view.config.hello_address;
                    view.sb.add_multicast_route(hello_address, ifindex, &[]);
                    iface.hello_interval_start(&mut view, Duration::ZERO);
                }
            } else {
                iface.hello_interval_stop(&mut view);
            }
        }

        if !up {
            // Kill every neighbor reached through this interface and pull
            // its routes ahead of the next SPF run.
            let router_ids = arenas.neighbors.router_ids_by_iface(ifindex);
            if let Some(iface) = arenas.interfaces.get(ifindex) {
                for router_id in router_ids {
                    if let Some(nbr) =
                        arenas.neighbors.get_mut(ifindex, router_id)
                    {
                        nbr.fsm(iface, &mut view, nsm::Event::LinkDown);
                        nbr.cancel_timers(&mut view);
                    }
                    arenas.neighbors.remove(ifindex, router_id);
                }
            }
            route::remove_iface_routes(&mut view, ifindex);
        }

        view.state.pending_orig.insert(LsaOrigKind::Router);
        spf::schedule(&mut view);
        self.run_pending(now);
    }

    // ===== timer processing =====

    // Earliest pending deadline, if any.
    pub fn next_timeout(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // Drains and dispatches every timer message due at `now`.
    pub fn process_timers(&mut self, now: Instant) {
        while let Some(msg) = self.timers.pop_due(now) {
            self.dispatch_timer(now, msg);
        }
        self.run_pending(now);
    }

    fn dispatch_timer(&mut self, now: Instant, msg: TimerMsg) {
        // Interface polling needs the whole instance, not just the split
        // view.
        if msg == TimerMsg::InterfaceSync {
            self.process_interface_sync(now);
            return;
        }

        let (mut view, arenas) = self.split(now);
        match msg {
            TimerMsg::HelloInterval { ifindex } => {
                events::process_hello_interval(&mut view, arenas, ifindex);
            }
            TimerMsg::NsmInactivity { ifindex, router_id } => {
                events::process_nsm_inactivity(
                    &mut view, arenas, ifindex, router_id,
                );
            }
            TimerMsg::RxmtInterval { ifindex, router_id } => {
                events::process_rxmt_interval(
                    &mut view, arenas, ifindex, router_id,
                );
            }
            TimerMsg::LsaExpiry { key } => {
                lsdb::flush(&mut view, arenas, key, LsaFlushReason::Expiry);
            }
            TimerMsg::LsaRefresh { key } => {
                lsdb::refresh(&mut view, arenas, key);
            }
            TimerMsg::LsaOrigDelayed { kind } => {
                events::process_lsa_orig_delayed(&mut view, arenas, kind);
            }
            TimerMsg::LsdbMaxAgeSweep => {
                lsdb::maxage_sweep(&mut view, arenas);
            }
            TimerMsg::SpfDelay => {
                events::process_spf_delay(&mut view, arenas);
            }
            TimerMsg::SpfHoldDown => {
                events::process_spf_hold_down(&mut view, arenas);
            }
            TimerMsg::LeaderDebounce => {
                leader::process_debounce(&mut view, arenas);
            }
            TimerMsg::InterfaceSync => (),
        }
    }

    // Polls the packet substrate for interface status changes.
    fn process_interface_sync(&mut self, now: Instant) {
        self.state.iface_sync_timer = None;

        let updates = self
            .arenas
            .interfaces
            .iter()
            .map(|iface| (iface.ifindex, iface.system_up))
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|(ifindex, system_up)| {
                let up = self.sb.interface_is_up(ifindex);
                (up != system_up).then_some((ifindex, up))
            })
            .collect::<Vec<_>>();
        for (ifindex, up) in updates {
            self.interface_update(now, ifindex, up);
        }

        if self.state.enabled && self.config.auto_sync_interfaces {
            self.state.iface_sync_timer = Some(tasks::interface_sync_timer(
                &mut self.timers,
                now,
                self.config.interface_sync_interval,
            ));
        }
    }

    // Runs the LSA originations requested by the handlers that already
    // returned.
    fn run_pending(&mut self, now: Instant) {
        loop {
            let kinds = std::mem::take(&mut self.state.pending_orig);
            if kinds.is_empty() {
                break;
            }
            let (mut view, arenas) = self.split(now);
            for kind in kinds {
                events::process_lsa_orig(&mut view, arenas, kind);
            }
        }
    }

    // Recomputes the router's home area: the area holding most of its
    // interfaces, ties broken toward the numerically lowest.
    fn update_home_area(&mut self) {
        let mut counts: BTreeMap<Ipv4Addr, usize> = BTreeMap::new();
        for iface in self.arenas.interfaces.iter() {
            *counts.entry(iface.area_id).or_default() += 1;
        }
        if let Some((area_id, _)) = counts
            .into_iter()
            .max_by_key(|(area_id, count)| (*count, std::cmp::Reverse(*area_id)))
        {
            self.state.home_area = area_id;
        }
    }

    // ===== introspection =====

    pub fn router_id(&self) -> Ipv4Addr {
        self.state.router_id
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    pub fn is_area_leader(&self) -> bool {
        self.state.leader.is_leader
    }

    pub fn lsdb(&self) -> &Lsdb {
        &self.state.lsdb
    }

    pub fn router_lsdb(
        &self,
    ) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> + '_ {
        self.state.lsdb.iter_type(LsaType::Router)
    }

    pub fn l1_summary_lsdb(
        &self,
    ) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> + '_ {
        self.state.lsdb.iter_type(LsaType::L1Summary)
    }

    pub fn area_lsdb(
        &self,
    ) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> + '_ {
        self.state.lsdb.iter_type(LsaType::Area)
    }

    pub fn l2_summary_lsdb(
        &self,
    ) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> + '_ {
        self.state.lsdb.iter_type(LsaType::L2Summary)
    }

    // Stable hash over the Router-LSA database, used for convergence
    // checks.
    pub fn lsdb_hash(&self) -> u64 {
        self.state.lsdb.router_hash()
    }

    pub fn routing_table(&self) -> &BTreeMap<Ipv4Network, RouteNet> {
        &self.state.rib
    }

    pub fn print_routing(
        &self,
        dir: &Path,
        file_name: &str,
    ) -> std::io::Result<()> {
        route::print_routing(&self.state.rib, dir, file_name)
    }

    pub fn hello_tx_count(&self) -> u64 {
        self.state.hello_tx_count
    }

    // ===== snapshot =====

    pub fn export_metadata(
        &self,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), Error> {
        snapshot::export_metadata(self.state.leader.is_leader, dir, file_name)
    }

    pub fn import_metadata(
        &mut self,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), Error> {
        match snapshot::import_metadata(dir, file_name) {
            Ok(is_leader) => {
                self.state.leader.is_leader = is_leader;
                Ok(())
            }
            Err(error) => {
                error.log();
                Err(error)
            }
        }
    }

    pub fn export_prefixes(
        &self,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), Error> {
        snapshot::export_prefixes(&self.state.rib, dir, file_name)
    }

    pub fn import_prefixes(
        &mut self,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), Error> {
        snapshot::import_prefixes(&mut self.state.rib, dir, file_name)
            .inspect_err(|error| error.log())
    }

    pub fn export_neighbors(
        &self,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), Error> {
        snapshot::export_neighbors(&self.arenas, dir, file_name)
    }

    pub fn import_neighbors(
        &mut self,
        now: Instant,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), Error> {
        let (mut view, arenas) = self.split(now);
        snapshot::import_neighbors(&mut view, arenas, dir, file_name)
            .inspect_err(|error| error.log())
    }

    pub fn export_lsdb(
        &self,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), Error> {
        snapshot::export_lsdb(&self.state.lsdb, dir, file_name)
    }

    pub fn import_lsdb(
        &mut self,
        now: Instant,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), Error> {
        let (mut view, arenas) = self.split(now);
        let result = snapshot::import_lsdb(&mut view, arenas, dir, file_name)
            .inspect_err(|error| error.log());
        self.run_pending(now);
        result
    }
}
