//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use proxima_utils::timer::TimerHandle;

use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::output;
use crate::packet::lsa::{Lsa, LsaKey, LsaScope};
use crate::southbound::Southbound;
use crate::tasks::{self, LsaOrigKind};

#[derive(Debug)]
pub struct Neighbor {
    // Remote Router-ID.
    pub router_id: Ipv4Addr,
    // Remote interface address.
    pub src: Ipv4Addr,
    // Area the neighbor reports in its packet headers. Differs from the
    // receiving interface's area on cross-area adjacencies.
    pub area_id: Ipv4Addr,
    pub state: nsm::State,

    pub event_count: u32,
    pub discontinuity_time: DateTime<Utc>,

    pub lists: NeighborLsaLists,
    pub tasks: NeighborTasks,
}

// Neighbor collection, keyed by (interface index, remote Router-ID).
//
// Neighbors live outside the interface records so that interface and
// neighbor state can be borrowed independently.
#[derive(Debug, Default)]
pub struct Neighbors(BTreeMap<(u32, Ipv4Addr), Neighbor>);

#[derive(Debug, Default)]
pub struct NeighborLsaLists {
    // LSAs waiting to be acknowledged.
    pub ls_rxmt: BTreeMap<LsaKey, Arc<Lsa>>,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity_timer: Option<TimerHandle>,
    pub rxmt_lsupd: Option<TimerHandle>,
}

// Neighbor state machine.
pub mod nsm {
    use num_derive::FromPrimitive;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(FromPrimitive)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down = 0,
        Init = 1,
        TwoWay = 2,
        ExStart = 3,
        Exchange = 4,
        Loading = 5,
        Full = 6,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        TwoWayRcvd,
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(
        router_id: Ipv4Addr,
        src: Ipv4Addr,
        area_id: Ipv4Addr,
    ) -> Neighbor {
        Debug::NeighborCreate(router_id).log();

        Neighbor {
            router_id,
            src,
            area_id,
            state: nsm::State::Down,
            event_count: 0,
            discontinuity_time: Utc::now(),
            lists: Default::default(),
            tasks: Default::default(),
        }
    }

    pub(crate) fn fsm<S>(
        &mut self,
        iface: &Interface,
        instance: &mut InstanceUpView<'_, S>,
        event: nsm::Event,
    ) where
        S: Southbound,
    {
        Debug::NsmEvent(self.router_id, &self.state, &event).log();

        let new_state = match (self.state, &event) {
            // NSM (state, event) -> (Action, new state)
            (nsm::State::Down, nsm::Event::HelloRcvd) => {
                self.inactivity_timer_reset(iface, instance);
                Some(nsm::State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (_, nsm::Event::HelloRcvd) => {
                self.inactivity_timer_reset(iface, instance);
                None
            }
            // NSM (state, event) -> (Action, new state)
            (nsm::State::Init, nsm::Event::TwoWayRcvd) => {
                // Point-to-point adjacencies synchronize through flooding:
                // dump the entire LSDB onto the retransmission list and go
                // straight to Full.
                self.initial_db_dump(iface, instance);
                Some(nsm::State::Full)
            }
            // NSM (state, event) -> (Action, new state)
            (_, nsm::Event::TwoWayRcvd) => {
                // No action required.
                None
            }
            // NSM (state, event) -> (Action, new state)
            (nsm::State::Init | nsm::State::Down, nsm::Event::OneWayRcvd) => {
                // No action required.
                None
            }
            // NSM (state, event) -> (Action, new state)
            (_, nsm::Event::OneWayRcvd) => {
                self.reset_adjacency(instance);
                Some(nsm::State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (
                _,
                nsm::Event::Kill
                | nsm::Event::InactivityTimer
                | nsm::Event::LinkDown,
            ) => {
                self.reset_adjacency(instance);
                if let Some(timer) = self.tasks.inactivity_timer.take() {
                    instance.timers.cancel(timer);
                }
                Some(nsm::State::Down)
            }
        };

        // Check for FSM state change.
        if let Some(new_state) = new_state
            && new_state != self.state
        {
            self.fsm_state_change(iface, instance, new_state);
        }
    }

    fn fsm_state_change<S>(
        &mut self,
        iface: &Interface,
        instance: &mut InstanceUpView<'_, S>,
        new_state: nsm::State,
    ) where
        S: Southbound,
    {
        // Check if the neighbor changed to/from the Full state.
        if new_state == nsm::State::Full || self.state == nsm::State::Full {
            // (Re)originate LSAs that might have been affected.
            instance.state.pending_orig.insert(LsaOrigKind::Router);
            if self.is_cross_area(iface) {
                instance.state.pending_orig.insert(LsaOrigKind::AreaProxy);
            }
        }

        // Effectively transition to the new FSM state.
        Debug::NsmTransition(self.router_id, &self.state, &new_state).log();
        self.state = new_state;

        // Update statistics.
        self.event_count += 1;
        self.discontinuity_time = Utc::now();
    }

    // Returns true when the neighbor sits in a different area than the
    // receiving interface.
    pub(crate) fn is_cross_area(&self, iface: &Interface) -> bool {
        self.area_id != iface.area_id
    }

    // Enqueues the full LSDB on the retransmission list and transmits it in
    // one go. Reliability comes from the retransmission interval.
    fn initial_db_dump<S>(
        &mut self,
        iface: &Interface,
        instance: &mut InstanceUpView<'_, S>,
    ) where
        S: Southbound,
    {
        let cross_area = self.is_cross_area(iface);
        let lsas = instance
            .state
            .lsdb
            .iter()
            .filter(|(_, lse)| {
                // Cross-area adjacencies only carry domain-scoped LSAs.
                !cross_area
                    || lse.data.hdr.lsa_type.scope() == LsaScope::Domain
            })
            .map(|(_, lse)| lse.data.clone())
            .collect::<Vec<_>>();

        for lsa in &lsas {
            self.lists.ls_rxmt.insert(lsa.hdr.key(), lsa.clone());
        }
        self.rxmt_lsupd_start_check(iface, instance);

        if !lsas.is_empty() {
            output::send_lsupd(instance, iface, self.src, &lsas);
        }
    }

    fn reset_adjacency<S>(&mut self, instance: &mut InstanceUpView<'_, S>)
    where
        S: Southbound,
    {
        self.lists = Default::default();
        if let Some(timer) = self.tasks.rxmt_lsupd.take() {
            instance.timers.cancel(timer);
        }
    }

    pub(crate) fn inactivity_timer_reset<S>(
        &mut self,
        iface: &Interface,
        instance: &mut InstanceUpView<'_, S>,
    ) where
        S: Southbound,
    {
        let deadline = instance.now + instance.config.dead_interval;
        match self.tasks.inactivity_timer {
            Some(timer) => {
                instance.timers.reset(timer, deadline);
            }
            None => {
                self.tasks.inactivity_timer =
                    Some(tasks::nsm_inactivity_timer(
                        instance.timers,
                        instance.now,
                        instance.config.dead_interval,
                        iface.ifindex,
                        self.router_id,
                    ));
            }
        }
    }

    pub(crate) fn rxmt_lsupd_start_check<S>(
        &mut self,
        iface: &Interface,
        instance: &mut InstanceUpView<'_, S>,
    ) where
        S: Southbound,
    {
        if !self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_none() {
            self.tasks.rxmt_lsupd = Some(tasks::packet_rxmt_interval(
                instance.timers,
                instance.now,
                instance.config.rxmt_interval,
                iface.ifindex,
                self.router_id,
            ));
        }
    }

    pub(crate) fn rxmt_lsupd_stop_check<S>(
        &mut self,
        instance: &mut InstanceUpView<'_, S>,
    ) where
        S: Southbound,
    {
        if self.lists.ls_rxmt.is_empty()
            && let Some(timer) = self.tasks.rxmt_lsupd.take()
        {
            instance.timers.cancel(timer);
        }
    }

    // Cancels every pending timer tied to this neighbor.
    pub(crate) fn cancel_timers<S>(
        &mut self,
        instance: &mut InstanceUpView<'_, S>,
    ) where
        S: Southbound,
    {
        if let Some(timer) = self.tasks.inactivity_timer.take() {
            instance.timers.cancel(timer);
        }
        if let Some(timer) = self.tasks.rxmt_lsupd.take() {
            instance.timers.cancel(timer);
        }
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NeighborDelete(self.router_id).log();
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    pub(crate) fn insert(
        &mut self,
        ifindex: u32,
        nbr: Neighbor,
    ) -> &mut Neighbor {
        use std::collections::btree_map::Entry;

        match self.0.entry((ifindex, nbr.router_id)) {
            Entry::Occupied(mut o) => {
                o.insert(nbr);
                o.into_mut()
            }
            Entry::Vacant(v) => v.insert(nbr),
        }
    }

    pub(crate) fn remove(
        &mut self,
        ifindex: u32,
        router_id: Ipv4Addr,
    ) -> Option<Neighbor> {
        self.0.remove(&(ifindex, router_id))
    }

    pub fn get(&self, ifindex: u32, router_id: Ipv4Addr) -> Option<&Neighbor> {
        self.0.get(&(ifindex, router_id))
    }

    pub(crate) fn get_mut(
        &mut self,
        ifindex: u32,
        router_id: Ipv4Addr,
    ) -> Option<&mut Neighbor> {
        self.0.get_mut(&(ifindex, router_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Neighbor)> + '_ {
        self.0.iter().map(|((ifindex, _), nbr)| (*ifindex, nbr))
    }

    pub(crate) fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (u32, &mut Neighbor)> + '_ {
        self.0.iter_mut().map(|((ifindex, _), nbr)| (*ifindex, nbr))
    }

    pub fn iter_by_iface(
        &self,
        ifindex: u32,
    ) -> impl Iterator<Item = &Neighbor> + '_ {
        self.0
            .range(
                (ifindex, Ipv4Addr::UNSPECIFIED)
                    ..=(ifindex, Ipv4Addr::BROADCAST),
            )
            .map(|(_, nbr)| nbr)
    }

    pub(crate) fn iter_by_iface_mut(
        &mut self,
        ifindex: u32,
    ) -> impl Iterator<Item = &mut Neighbor> + '_ {
        self.0
            .range_mut(
                (ifindex, Ipv4Addr::UNSPECIFIED)
                    ..=(ifindex, Ipv4Addr::BROADCAST),
            )
            .map(|(_, nbr)| nbr)
    }

    pub(crate) fn router_ids_by_iface(&self, ifindex: u32) -> Vec<Ipv4Addr> {
        self.iter_by_iface(ifindex)
            .map(|nbr| nbr.router_id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
