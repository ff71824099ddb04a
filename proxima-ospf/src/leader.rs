//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use proxima_utils::timer::TimerHandle;

use crate::debug::{Debug, LsaFlushReason};
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::lsdb::{self, LsaEntryFlags};
use crate::packet::body::{
    LsaArea, LsaAreaLink, LsaBody, LsaRouterLinkType, LsaSummary,
    LsaSummaryPrefix,
};
use crate::packet::lsa::{LsaKey, LsaType};
use crate::southbound::Southbound;
use crate::tasks::{self, LsaOrigKind};

// Area leader election state.
//
// The leader is the reachable router with the numerically smallest
// Router-ID. Election is purely deterministic from the LSDB; the debounce
// window keeps leadership from oscillating while the area reconverges.
#[derive(Debug, Default)]
pub struct LeaderState {
    pub is_leader: bool,
    pub candidate: Option<Ipv4Addr>,
    pub debounce_timer: Option<TimerHandle>,
}

// ===== global functions =====

// Re-evaluates the leader candidate from the current L1 reachability. A
// candidate only assumes (or cedes) leadership after holding its status for
// a full debounce window.
pub(crate) fn evaluate<S>(instance: &mut InstanceUpView<'_, S>)
where
    S: Southbound,
{
    if !instance.config.enable_area_proxy {
        return;
    }

    // Reachable routers backed by a live Router-LSA, ourselves included.
    let candidate = instance
        .state
        .spt
        .keys()
        .copied()
        .filter(|router_id| {
            let key = LsaKey::new(LsaType::Router, *router_id, *router_id);
            instance
                .state
                .lsdb
                .get(&key)
                .is_some_and(|lse| !lse.data.hdr.is_maxage())
        })
        .chain(std::iter::once(instance.state.router_id))
        .min();

    if candidate != instance.state.leader.candidate {
        Debug::LeaderCandidateChange(candidate).log();
        instance.state.leader.candidate = candidate;

        // Restart the debounce window.
        let window = instance.config.hello_interval * 2;
        let handle =
            tasks::leader_debounce_timer(instance.timers, instance.now, window);
        if let Some(old) = instance.state.leader.debounce_timer.replace(handle)
        {
            instance.timers.cancel(old);
        }
    }
}

// The debounce window elapsed with a stable candidate.
pub(crate) fn process_debounce<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    instance.state.leader.debounce_timer = None;

    let should_lead =
        instance.state.leader.candidate == Some(instance.state.router_id);
    if should_lead && !instance.state.leader.is_leader {
        assume(instance);
    } else if !should_lead && instance.state.leader.is_leader {
        cede(instance, arenas);
    }
}

// Forces the leadership flag, used by drivers and tests.
pub(crate) fn force<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    is_leader: bool,
) where
    S: Southbound,
{
    if is_leader && !instance.state.leader.is_leader {
        assume(instance);
    } else if !is_leader && instance.state.leader.is_leader {
        cede(instance, arenas);
    }
}

fn assume<S>(instance: &mut InstanceUpView<'_, S>)
where
    S: Southbound,
{
    Debug::LeaderAssume(instance.state.router_id).log();
    instance.state.leader.is_leader = true;
    instance.state.pending_orig.insert(LsaOrigKind::AreaProxy);
}

// On losing leadership the router withdraws its Area-LSA and L2-Summary by
// flushing them with MaxAge.
fn cede<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    Debug::LeaderCede(instance.state.router_id).log();

    let area_id = instance.state.home_area;
    for lsa_type in [LsaType::Area, LsaType::L2Summary] {
        let key = LsaKey::new(lsa_type, area_id, area_id);
        if instance
            .state
            .lsdb
            .get(&key)
            .is_some_and(|lse| lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED))
        {
            lsdb::flush(instance, arenas, key, LsaFlushReason::PrematureAging);
        }
    }

    instance.state.leader.is_leader = false;
}

// Composes and originates the Area-LSA and L2-Summary for our area, from
// the ingested Router-LSAs and L1-Summaries. Both carry the area itself as
// link-state-id and advertising router: the area is the virtual node, and
// sequence numbering survives leadership handover through the ordinary
// arbitration rules.
pub(crate) fn originate_proxy_lsas<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    if !instance.config.enable_area_proxy || !instance.state.leader.is_leader
    {
        return;
    }

    let area_id = instance.state.home_area;

    // Area-LSA: one link per peer area, aggregated to the minimum metric
    // over the reachable border routers advertising it.
    let mut area_links: BTreeMap<Ipv4Addr, u32> = BTreeMap::new();
    for (key, lse) in instance.state.lsdb.iter_type(LsaType::Router) {
        if lse.data.hdr.is_maxage()
            || !instance.state.spt.contains_key(&key.adv_rtr)
        {
            continue;
        }
        let Some(body) = lse.data.body.as_router() else {
            continue;
        };
        for link in body
            .links
            .iter()
            .filter(|link| link.link_type == LsaRouterLinkType::AreaProxy)
        {
            let metric = link.metric as u32;
            area_links
                .entry(link.link_id)
                .and_modify(|curr| *curr = (*curr).min(metric))
                .or_insert(metric);
        }
    }
    let body = LsaBody::Area(LsaArea {
        links: area_links
            .into_iter()
            .map(|(peer_area, metric)| LsaAreaLink::new(peer_area, metric))
            .collect(),
    });
    lsdb::originate_check(instance, arenas, area_id, area_id, body);

    // L2-Summary: the union of the area's L1-Summary prefixes, deduplicated
    // with minimum-metric resolution on collision.
    let mut prefixes: BTreeMap<(Ipv4Addr, Ipv4Addr), u32> = BTreeMap::new();
    for (key, lse) in instance.state.lsdb.iter_type(LsaType::L1Summary) {
        if lse.data.hdr.is_maxage()
            || !instance.state.spt.contains_key(&key.adv_rtr)
        {
            continue;
        }
        let Some(body) = lse.data.body.as_l1_summary() else {
            continue;
        };
        for prefix in &body.prefixes {
            prefixes
                .entry((prefix.address, prefix.mask))
                .and_modify(|curr| *curr = (*curr).min(prefix.metric))
                .or_insert(prefix.metric);
        }
    }
    let body = LsaBody::L2Summary(LsaSummary {
        prefixes: prefixes
            .into_iter()
            .map(|((address, mask), metric)| {
                LsaSummaryPrefix::new(address, mask, metric)
            })
            .collect(),
    });
    lsdb::originate_check(instance, arenas, area_id, area_id, body);
}
