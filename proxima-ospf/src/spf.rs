//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::leader;
use crate::lsdb::LsaEntry;
use crate::neighbor::nsm;
use crate::packet::body::{LsaRouterLink, LsaRouterLinkType};
use crate::packet::lsa::{LsaKey, LsaType};
use crate::route;
use crate::southbound::Southbound;
use crate::tasks;

// Shortest-path tree node of the L1 (intra-area router graph) computation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SptNode {
    pub distance: u32,
    // Egress interface and neighbor address toward this router. The root
    // carries no nexthop.
    pub nexthop: Option<(u32, Ipv4Addr)>,
}

// Shortest-path tree node of the L2 (inter-area graph of area virtual
// nodes) computation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AreaSptNode {
    pub distance: u32,
    // First peer area on the path from the local area. The local area
    // carries none.
    pub first_hop_area: Option<Ipv4Addr>,
}

// SPF Delay State Machine.
//
// Any LSDB change schedules a run SpfDelay in the future; further changes
// within the window coalesce. After a run, a hold-down prevents the next
// run from starting until it has elapsed.
pub mod fsm {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Quiet,
        Scheduled,
        HoldDown,
    }

    #[derive(Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        Igp,
        DelayTimer,
        HoldDownTimer,
    }
}

// ===== global functions =====

// Handles an SPF-triggering LSDB change (the Igp event). Kept separate from
// the timer transitions because triggers fire from deep inside LSDB
// maintenance, where only the instance view is available.
pub(crate) fn schedule<S>(instance: &mut InstanceUpView<'_, S>)
where
    S: Southbound,
{
    Debug::SpfDelayFsmEvent(
        &instance.state.spf_delay_state,
        &fsm::Event::Igp,
    )
    .log();

    match instance.state.spf_delay_state {
        fsm::State::Quiet => {
            instance.state.spf_delay_timer = Some(tasks::spf_delay_timer(
                instance.timers,
                instance.now,
                instance.config.spf_delay,
            ));
            transition(instance, fsm::State::Scheduled);
        }
        fsm::State::Scheduled => {
            // Coalesce with the already scheduled run.
        }
        fsm::State::HoldDown => {
            instance.state.spf_pending = true;
        }
    }
}

pub(crate) fn fsm<S>(
    event: fsm::Event,
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) -> Result<(), Error>
where
    S: Southbound,
{
    Debug::SpfDelayFsmEvent(&instance.state.spf_delay_state, &event).log();

    match (instance.state.spf_delay_state, &event) {
        // SPF_TIMER expiration: compute and enter hold-down.
        (fsm::State::Scheduled, fsm::Event::DelayTimer) => {
            instance.state.spf_delay_timer = None;

            compute_spf(instance, arenas);

            instance.state.spf_hold_down_timer =
                Some(tasks::spf_hold_down_timer(
                    instance.timers,
                    instance.now,
                    instance.config.spf_hold_down,
                ));
            transition(instance, fsm::State::HoldDown);
            Ok(())
        }
        // HOLDDOWN_TIMER expiration: run a postponed computation or go
        // quiet.
        (fsm::State::HoldDown, fsm::Event::HoldDownTimer) => {
            instance.state.spf_hold_down_timer = None;

            if instance.state.spf_pending {
                instance.state.spf_pending = false;
                instance.state.spf_delay_timer =
                    Some(tasks::spf_delay_timer(
                        instance.timers,
                        instance.now,
                        instance.config.spf_delay,
                    ));
                transition(instance, fsm::State::Scheduled);
            } else {
                transition(instance, fsm::State::Quiet);
            }
            Ok(())
        }
        _ => Err(Error::SpfDelayUnexpectedEvent(
            instance.state.spf_delay_state,
            event,
        )),
    }
}

fn transition<S>(instance: &mut InstanceUpView<'_, S>, new_state: fsm::State)
where
    S: Southbound,
{
    if new_state != instance.state.spf_delay_state {
        Debug::SpfDelayFsmTransition(
            &instance.state.spf_delay_state,
            &new_state,
        )
        .log();
        instance.state.spf_delay_state = new_state;
    }
}

// This is the SPF main function.
fn compute_spf<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    Debug::SpfRunStart.log();
    instance.state.spf_run_count += 1;

    // L1: shortest paths across the intra-area router graph.
    instance.state.spt = run_l1(instance, arenas);

    // Reachability just changed, so the leader election input did too, and
    // a sitting leader re-aggregates its area summaries from the fresh
    // intra-area picture.
    leader::evaluate(instance);
    if instance.state.leader.is_leader {
        instance
            .state
            .pending_orig
            .insert(tasks::LsaOrigKind::AreaProxy);
    }

    // L2: shortest paths across the inter-area graph of area virtual nodes.
    instance.state.area_spt = if instance.config.enable_area_proxy {
        run_l2(instance)
    } else {
        Default::default()
    };

    // Update routing table.
    route::update_rib(instance, arenas);
}

// Dijkstra over the Router-LSAs of the local area.
fn run_l1<S>(
    instance: &InstanceUpView<'_, S>,
    arenas: &InstanceArenas,
) -> BTreeMap<Ipv4Addr, SptNode>
where
    S: Southbound,
{
    let root = instance.state.router_id;
    let mut spt = BTreeMap::new();

    if vertex_find(instance, root).is_none() {
        // Our own Router-LSA is not in the database yet; the only
        // reachable router is ourselves.
        Error::SpfRootNotFound(root).log();
        spt.insert(
            root,
            SptNode {
                distance: 0,
                nexthop: None,
            },
        );
        return spt;
    }

    // Initialize candidate list with the root vertex.
    let mut cand_list: BTreeMap<(u32, Ipv4Addr), SptNode> = BTreeMap::new();
    cand_list.insert(
        (0, root),
        SptNode {
            distance: 0,
            nexthop: None,
        },
    );

    // Main SPF loop.
    while let Some(((_, vertex_id), vertex)) = cand_list.pop_first() {
        // Add vertex to SPT.
        spt.insert(vertex_id, vertex);

        // Iterate over all point-to-point links described by the vertex's
        // LSA.
        for link in vertex_links(instance, vertex_id) {
            let link_id = link.link_id;

            // Check if the LSAs are mutually linked.
            if !vertex_links(instance, link_id)
                .any(|rev| rev.link_id == vertex_id)
            {
                continue;
            }

            // Check if the link's vertex is already on the shortest-path
            // tree.
            if spt.contains_key(&link_id) {
                continue;
            }

            // Calculate distance to the link's vertex.
            let distance = vertex.distance.saturating_add(link.metric as u32);

            // Check if this vertex is already present on the candidate list
            // with a lower or equal cost.
            if let Some(cand_key) = cand_list
                .keys()
                .find(|(_, id)| *id == link_id)
                .copied()
            {
                if distance >= cand_key.0 {
                    continue;
                }
                cand_list.remove(&cand_key);
            }

            // Compute the nexthop used to reach the new vertex: adjacent
            // routers are reached directly, everything else inherits the
            // parent's nexthop.
            let nexthop = match vertex.nexthop {
                Some(nexthop) => Some(nexthop),
                None => calc_direct_nexthop(arenas, link_id),
            };

            cand_list.insert(
                (distance, link_id),
                SptNode { distance, nexthop },
            );
        }
    }

    spt
}

// Looks up a non-MaxAge Router-LSA vertex.
fn vertex_find<'a, S>(
    instance: &'a InstanceUpView<'_, S>,
    router_id: Ipv4Addr,
) -> Option<&'a LsaEntry>
where
    S: Southbound,
{
    let key = LsaKey::new(LsaType::Router, router_id, router_id);
    instance
        .state
        .lsdb
        .get(&key)
        .filter(|lse| !lse.data.hdr.is_maxage())
}

// Iterates over the point-to-point links of a router vertex.
fn vertex_links<'a, S>(
    instance: &'a InstanceUpView<'_, S>,
    router_id: Ipv4Addr,
) -> impl Iterator<Item = &'a LsaRouterLink> + 'a
where
    S: Southbound,
{
    vertex_find(instance, router_id)
        .and_then(|lse| lse.data.body.as_router())
        .map(|body| body.links.iter())
        .into_iter()
        .flatten()
        .filter(|link| link.link_type == LsaRouterLinkType::PointToPoint)
}

// Nexthop toward a router adjacent to the root.
fn calc_direct_nexthop(
    arenas: &InstanceArenas,
    router_id: Ipv4Addr,
) -> Option<(u32, Ipv4Addr)> {
    arenas
        .neighbors
        .iter()
        .filter(|(_, nbr)| {
            nbr.router_id == router_id && nbr.state == nsm::State::Full
        })
        .map(|(ifindex, nbr)| (ifindex, nbr.src))
        .next()
}

// Dijkstra over the Area-LSAs, with each area as one virtual node.
fn run_l2<S>(instance: &InstanceUpView<'_, S>) -> BTreeMap<Ipv4Addr, AreaSptNode>
where
    S: Southbound,
{
    let root = instance.state.home_area;
    let mut spt = BTreeMap::new();
    let mut cand_list: BTreeMap<(u32, Ipv4Addr), AreaSptNode> =
        BTreeMap::new();
    cand_list.insert(
        (0, root),
        AreaSptNode {
            distance: 0,
            first_hop_area: None,
        },
    );

    while let Some(((_, vertex_id), vertex)) = cand_list.pop_first() {
        spt.insert(vertex_id, vertex);

        for link in area_links(instance, vertex_id) {
            let peer = link.peer_area;

            // Check if the areas are mutually linked.
            if !area_links(instance, peer)
                .any(|rev| rev.peer_area == vertex_id)
            {
                continue;
            }

            if spt.contains_key(&peer) {
                continue;
            }

            let distance = vertex.distance.saturating_add(link.metric);

            if let Some(cand_key) = cand_list
                .keys()
                .find(|(_, id)| *id == peer)
                .copied()
            {
                if distance >= cand_key.0 {
                    continue;
                }
                cand_list.remove(&cand_key);
            }

            // Areas adjacent to ours become the first hop; farther areas
            // inherit it.
            let first_hop_area = match vertex.first_hop_area {
                Some(area) => Some(area),
                None => Some(peer),
            };

            cand_list.insert(
                (distance, peer),
                AreaSptNode {
                    distance,
                    first_hop_area,
                },
            );
        }
    }

    spt
}

// Iterates over the links of an area vertex.
fn area_links<'a, S>(
    instance: &'a InstanceUpView<'_, S>,
    area_id: Ipv4Addr,
) -> impl Iterator<Item = &'a crate::packet::body::LsaAreaLink> + 'a
where
    S: Southbound,
{
    let key = LsaKey::new(LsaType::Area, area_id, area_id);
    instance
        .state
        .lsdb
        .get(&key)
        .filter(|lse| !lse.data.hdr.is_maxage())
        .and_then(|lse| lse.data.body.as_area())
        .map(|body| body.links.iter())
        .into_iter()
        .flatten()
}
