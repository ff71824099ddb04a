//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use itertools::Itertools;
use proxima_utils::ip;
use serde::{Deserialize, Serialize};

use crate::instance::{InstanceArenas, InstanceUpView};
use crate::neighbor::nsm;
use crate::packet::body::LsaRouterLinkType;
use crate::packet::lsa::{LsaKey, LsaType};
use crate::southbound::Southbound;

// Routing table entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RouteNet {
    pub path_type: PathType,
    pub metric: u32,
    // Directly connected routes carry no nexthop.
    pub nexthop: Option<Ipv4Addr>,
    pub ifindex: u32,
    pub flags: RouteNetFlags,
}

// Route types in decreasing order of preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PathType {
    IntraArea,
    InterArea,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteNetFlags: u8 {
        const CONNECTED = 0x01;
        const INSTALLED = 0x02;
    }
}

// ===== global functions =====

// Rebuilds the routing table from the latest SPF results and applies the
// difference against the currently installed routes.
pub(crate) fn update_rib<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    let mut rib = BTreeMap::new();

    // Directly connected networks.
    for iface in arenas.interfaces.iter() {
        if !iface.is_ready() {
            continue;
        }
        if let Some(prefix) = iface.network() {
            rib.insert(
                prefix,
                RouteNet {
                    path_type: PathType::IntraArea,
                    metric: iface.metric as u32,
                    nexthop: None,
                    ifindex: iface.ifindex,
                    flags: RouteNetFlags::CONNECTED,
                },
            );
        }
    }

    // The gateway default route bypasses protocol dynamics.
    if let Some(gateway) = &instance.state.gateway
        && let Some(&ifindex) = gateway.ifindexes.first()
    {
        route_update(
            &mut rib,
            Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap(),
            RouteNet {
                path_type: PathType::IntraArea,
                metric: 0,
                nexthop: Some(gateway.nexthop),
                ifindex,
                flags: RouteNetFlags::empty(),
            },
        );
    }

    // Intra-area routes.
    update_rib_intra_area(instance, &mut rib);

    // Inter-area routes.
    if instance.config.enable_area_proxy {
        update_rib_inter_area(instance, arenas, &mut rib);
    }

    update_global_rib(instance, arenas, rib);
}

fn update_rib_intra_area<S>(
    instance: &InstanceUpView<'_, S>,
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
) where
    S: Southbound,
{
    for (&router_id, node) in &instance.state.spt {
        if router_id == instance.state.router_id {
            continue;
        }
        let Some((ifindex, nexthop)) = node.nexthop else {
            continue;
        };

        // Stub links describe the router's connected networks.
        let lsa_key = LsaKey::new(LsaType::Router, router_id, router_id);
        if let Some(lse) = instance.state.lsdb.get(&lsa_key)
            && let Some(body) = lse.data.body.as_router()
            && !lse.data.hdr.is_maxage()
        {
            for link in body
                .links
                .iter()
                .filter(|link| link.link_type == LsaRouterLinkType::Stub)
            {
                let Some(prefix) =
                    ip::network_from_mask(link.link_id, link.link_data)
                else {
                    continue;
                };
                route_update(
                    rib,
                    prefix,
                    RouteNet {
                        path_type: PathType::IntraArea,
                        metric: node
                            .distance
                            .saturating_add(link.metric as u32),
                        nexthop: Some(nexthop),
                        ifindex,
                        flags: RouteNetFlags::empty(),
                    },
                );
            }
        }

        // The router's L1-Summary describes its stub/external
        // reachability.
        let lsa_key = LsaKey::new(LsaType::L1Summary, router_id, router_id);
        if let Some(lse) = instance.state.lsdb.get(&lsa_key)
            && let Some(body) = lse.data.body.as_l1_summary()
            && !lse.data.hdr.is_maxage()
        {
            for summary in &body.prefixes {
                let Some(prefix) =
                    ip::network_from_mask(summary.address, summary.mask)
                else {
                    continue;
                };
                route_update(
                    rib,
                    prefix,
                    RouteNet {
                        path_type: PathType::IntraArea,
                        metric: node.distance.saturating_add(summary.metric),
                        nexthop: Some(nexthop),
                        ifindex,
                        flags: RouteNetFlags::empty(),
                    },
                );
            }
        }
    }
}

fn update_rib_inter_area<S>(
    instance: &InstanceUpView<'_, S>,
    arenas: &InstanceArenas,
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
) where
    S: Southbound,
{
    for (&area_id, node) in &instance.state.area_spt {
        if area_id == instance.state.home_area {
            continue;
        }
        let Some(first_hop_area) = node.first_hop_area else {
            continue;
        };
        let Some((ifindex, nexthop)) =
            resolve_area_nexthop(instance, arenas, first_hop_area)
        else {
            continue;
        };

        // Destination prefixes come from the area's L2-Summary.
        let lsa_key = LsaKey::new(LsaType::L2Summary, area_id, area_id);
        if let Some(lse) = instance.state.lsdb.get(&lsa_key)
            && let Some(body) = lse.data.body.as_l2_summary()
            && !lse.data.hdr.is_maxage()
        {
            for summary in &body.prefixes {
                let Some(prefix) =
                    ip::network_from_mask(summary.address, summary.mask)
                else {
                    continue;
                };
                route_update(
                    rib,
                    prefix,
                    RouteNet {
                        path_type: PathType::InterArea,
                        metric: node.distance.saturating_add(summary.metric),
                        nexthop: Some(nexthop),
                        ifindex,
                        flags: RouteNetFlags::empty(),
                    },
                );
            }
        }
    }
}

// Resolves the intra-area nexthop used to reach the given first-hop peer
// area: the best local border router advertising it, or our own cross-area
// adjacency when we are that border router.
fn resolve_area_nexthop<S>(
    instance: &InstanceUpView<'_, S>,
    arenas: &InstanceArenas,
    first_hop_area: Ipv4Addr,
) -> Option<(u32, Ipv4Addr)>
where
    S: Southbound,
{
    let router_id = instance.state.router_id;

    // Find the border router with the lowest total cost toward the peer
    // area, breaking ties on the lowest Router-ID.
    let (_, border) = instance
        .state
        .lsdb
        .iter_type(LsaType::Router)
        .filter(|(_, lse)| !lse.data.hdr.is_maxage())
        .filter_map(|(key, lse)| {
            let body = lse.data.body.as_router()?;
            let node = instance.state.spt.get(&key.adv_rtr)?;
            let link_metric = body
                .links
                .iter()
                .filter(|link| {
                    link.link_type == LsaRouterLinkType::AreaProxy
                        && link.link_id == first_hop_area
                })
                .map(|link| link.metric as u32)
                .min()?;
            Some((
                node.distance.saturating_add(link_metric),
                key.adv_rtr,
            ))
        })
        .min()?;

    if border == router_id {
        // We are the border router: steer straight onto the cross-area
        // adjacency.
        arenas
            .neighbors
            .iter()
            .filter(|(ifindex, nbr)| {
                nbr.state == nsm::State::Full
                    && nbr.area_id == first_hop_area
                    && arenas
                        .interfaces
                        .get(*ifindex)
                        .is_some_and(|iface| iface.is_ready())
            })
            .sorted_by_key(|(_, nbr)| nbr.router_id)
            .map(|(ifindex, nbr)| (ifindex, nbr.src))
            .next()
    } else {
        instance.state.spt.get(&border).and_then(|node| node.nexthop)
    }
}

// Adds a route to the routing table under construction, keeping the most
// preferred path on collision.
fn route_update(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    prefix: Ipv4Network,
    route: RouteNet,
) {
    use std::collections::btree_map::Entry;

    match rib.entry(prefix) {
        Entry::Occupied(mut o) => {
            let curr_route = o.get_mut();

            // Directly connected destinations are never overridden.
            if curr_route.flags.contains(RouteNetFlags::CONNECTED) {
                return;
            }

            if (route.path_type, route.metric)
                < (curr_route.path_type, curr_route.metric)
            {
                *curr_route = route;
            }
        }
        Entry::Vacant(v) => {
            v.insert(route);
        }
    }
}

// Installs new routes or routes that have changed, and uninstalls routes
// that are no longer available.
fn update_global_rib<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &InstanceArenas,
    mut rib: BTreeMap<Ipv4Network, RouteNet>,
) where
    S: Southbound,
{
    let mut old_rib = std::mem::take(&mut instance.state.rib);

    for (prefix, route) in &mut rib {
        // Remove route from the old RIB if it's present.
        if let Some(old_route) = old_rib.remove(prefix) {
            // Skip reinstalling the route if it hasn't changed.
            if old_route.metric == route.metric
                && old_route.nexthop == route.nexthop
                && old_route.ifindex == route.ifindex
            {
                if old_route.flags.contains(RouteNetFlags::INSTALLED) {
                    route.flags.insert(RouteNetFlags::INSTALLED);
                }
                continue;
            }
        }

        // Never install a route whose outgoing interface is down.
        let iface_up = arenas
            .interfaces
            .get(route.ifindex)
            .is_some_and(|iface| iface.is_ready());
        if !route.flags.contains(RouteNetFlags::CONNECTED)
            && iface_up
            && let Some(nexthop) = route.nexthop
        {
            instance.sb.add_host_route(
                *prefix,
                nexthop,
                route.ifindex,
                route.metric,
            );
            route.flags.insert(RouteNetFlags::INSTALLED);
        } else if route.flags.contains(RouteNetFlags::INSTALLED) {
            instance.sb.remove_host_route(*prefix);
            route.flags.remove(RouteNetFlags::INSTALLED);
        }
    }

    // Uninstall routes that are no longer available.
    for (prefix, _) in old_rib
        .into_iter()
        .filter(|(_, route)| route.flags.contains(RouteNetFlags::INSTALLED))
    {
        instance.sb.remove_host_route(prefix);
    }

    instance.state.rib = rib;
}

// Removes every route whose outgoing interface matches, used when an
// interface goes down ahead of the next SPF run.
pub(crate) fn remove_iface_routes<S>(
    instance: &mut InstanceUpView<'_, S>,
    ifindex: u32,
) where
    S: Southbound,
{
    let mut removed = vec![];
    instance.state.rib.retain(|prefix, route| {
        if route.ifindex == ifindex {
            removed.push((*prefix, *route));
            false
        } else {
            true
        }
    });
    for (prefix, route) in removed {
        if route.flags.contains(RouteNetFlags::INSTALLED) {
            instance.sb.remove_host_route(prefix);
        }
    }
}

// Writes the current routing table to `<dir>/<file_name>` in a tabular
// form.
pub(crate) fn print_routing(
    rib: &BTreeMap<Ipv4Network, RouteNet>,
    dir: &Path,
    file_name: &str,
) -> std::io::Result<()> {
    let header = format!(
        "{:<20} {:<16} {:<10} {:<8} {}",
        "Destination", "NextHop", "Interface", "Metric", "Type"
    );
    let body = rib
        .iter()
        .map(|(prefix, route)| {
            format!(
                "{:<20} {:<16} {:<10} {:<8} {:?}",
                prefix.to_string(),
                route
                    .nexthop
                    .map(|nexthop| nexthop.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                route.ifindex,
                route.metric,
                route.path_type,
            )
        })
        .join("\n");

    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(file_name), format!("{}\n{}\n", header, body))
}
