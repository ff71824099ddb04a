//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use crate::instance::{InstanceArenas, InstanceUpView};
use crate::neighbor::nsm;
use crate::output;
use crate::packet::lsa::{Lsa, LsaScope};
use crate::southbound::Southbound;

// ===== global functions =====

// Floods an LSA to every eligible adjacency except the one it arrived on.
//
// Flooding enqueues the LSA on each target neighbor's retransmission list
// and transmits it immediately; the retransmission interval provides the
// reliability.
//
// Returns true when the LSA was handed to at least one neighbor.
pub(crate) fn flood<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    lsa: &Arc<Lsa>,
    src: Option<(u32, std::net::Ipv4Addr)>,
) -> bool
where
    S: Southbound,
{
    let lsa_key = lsa.hdr.key();
    let scope = lsa.hdr.lsa_type.scope();
    let mut flooded = false;

    let ifindexes = arenas.interfaces.indexes().collect::<Vec<_>>();
    for ifindex in ifindexes {
        let Some(iface) = arenas.interfaces.get(ifindex) else {
            continue;
        };
        if !iface.is_ready() {
            continue;
        }

        let router_ids = arenas.neighbors.router_ids_by_iface(ifindex);
        for router_id in router_ids {
            let Some(nbr) = arenas.neighbors.get_mut(ifindex, router_id)
            else {
                continue;
            };

            // Only full adjacencies participate in flooding.
            if nbr.state < nsm::State::Full {
                continue;
            }

            // Area-scoped LSAs never cross an area boundary.
            if scope == LsaScope::Area && nbr.is_cross_area(iface) {
                continue;
            }

            // If the LSA was received from this neighbor, examine the next
            // neighbor.
            if src == Some((ifindex, router_id)) {
                continue;
            }

            // Add LSA to the neighbor's rxmt list (or update the old
            // version), then transmit.
            nbr.lists.ls_rxmt.insert(lsa_key, lsa.clone());
            nbr.rxmt_lsupd_start_check(iface, instance);
            let dst = nbr.src;
            output::send_lsupd(instance, iface, dst, &[lsa.clone()]);
            flooded = true;
        }
    }

    flooded
}
