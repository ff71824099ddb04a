//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::LSA_MAX_AGE;
use crate::neighbor::{Neighbor, Neighbors, nsm};
use crate::packet::lsa::{Lsa, LsaHdr};
use crate::packet::{Hello, LsAck, LsUpdate, Packet, PacketHdr, PacketType};
use crate::southbound::Southbound;

// Maximum packet payload carried in a single LS Update.
//
// Conservative enough to avoid fragmentation on common MTUs.
const MAX_PACKET_SIZE: usize = 1400;

// ===== Hello packets =====

pub(crate) fn send_hello<S>(
    instance: &mut InstanceUpView<'_, S>,
    iface: &mut Interface,
    neighbors: &Neighbors,
) where
    S: Southbound,
{
    // List all neighbors on this interface whose state is Init or higher.
    let nbrs = neighbors
        .iter_by_iface(iface.ifindex)
        .filter(|nbr| nbr.state >= nsm::State::Init)
        .map(|nbr| nbr.router_id)
        .collect();

    let hello = Hello {
        hdr: packet_hdr(instance, iface, PacketType::Hello),
        network_mask: iface.mask,
        hello_interval: instance.config.hello_interval.as_secs() as u16,
        options: Default::default(),
        priority: 0,
        dead_interval: instance.config.dead_interval.as_secs() as u32,
        neighbors: nbrs,
    };

    let dst = instance.config.hello_address;
    send_packet(instance, iface.ifindex, dst, &Packet::Hello(hello));

    // Update statistics.
    iface.hello_tx_count += 1;
    instance.state.hello_tx_count += 1;
}

// ===== LS Update packets =====

// Transmits the given LSAs to `dst`, splitting them into as many LS Update
// packets as needed. Ages are advanced to reflect the time spent in the
// database.
pub(crate) fn send_lsupd<S>(
    instance: &mut InstanceUpView<'_, S>,
    iface: &Interface,
    dst: Ipv4Addr,
    lsas: &[Arc<Lsa>],
) where
    S: Southbound,
{
    let mut batch = vec![];
    let mut batch_size = 0;

    for lsa in lsas {
        let mut lsa_copy = (**lsa).clone();
        if !lsa_copy.hdr.is_maxage() {
            // Transmitted copies carry their current age but are never
            // allowed to age out in flight; withdrawals keep MaxAge.
            let age = lsa.age(instance.now);
            lsa_copy.set_age(std::cmp::min(age, LSA_MAX_AGE - 1));
        }

        if batch_size + lsa_copy.raw.len() > MAX_PACKET_SIZE
            && !batch.is_empty()
        {
            send_lsupd_packet(
                instance,
                iface,
                dst,
                std::mem::take(&mut batch),
            );
            batch_size = 0;
        }
        batch_size += lsa_copy.raw.len();
        batch.push(lsa_copy);
    }

    if !batch.is_empty() {
        send_lsupd_packet(instance, iface, dst, batch);
    }
}

fn send_lsupd_packet<S>(
    instance: &mut InstanceUpView<'_, S>,
    iface: &Interface,
    dst: Ipv4Addr,
    lsas: Vec<Lsa>,
) where
    S: Southbound,
{
    let ls_upd = LsUpdate {
        hdr: packet_hdr(instance, iface, PacketType::LsUpdate),
        lsas,
    };
    send_packet(instance, iface.ifindex, dst, &Packet::LsUpdate(ls_upd));
}

// Retransmits every LSA still awaiting acknowledgment from the neighbor.
pub(crate) fn rxmt_lsupd<S>(
    instance: &mut InstanceUpView<'_, S>,
    iface: &Interface,
    nbr: &Neighbor,
) where
    S: Southbound,
{
    let lsas = nbr.lists.ls_rxmt.values().cloned().collect::<Vec<_>>();
    if !lsas.is_empty() {
        send_lsupd(instance, iface, nbr.src, &lsas);
    }
}

// ===== LS Ack packets =====

pub(crate) fn send_lsack<S>(
    instance: &mut InstanceUpView<'_, S>,
    iface: &Interface,
    dst: Ipv4Addr,
    lsa_hdrs: Vec<LsaHdr>,
) where
    S: Southbound,
{
    if lsa_hdrs.is_empty() {
        return;
    }

    let ls_ack = LsAck {
        hdr: packet_hdr(instance, iface, PacketType::LsAck),
        lsa_hdrs,
    };
    send_packet(instance, iface.ifindex, dst, &Packet::LsAck(ls_ack));
}

// ===== helper functions =====

fn packet_hdr<S>(
    instance: &InstanceUpView<'_, S>,
    iface: &Interface,
    pkt_type: PacketType,
) -> PacketHdr
where
    S: Southbound,
{
    PacketHdr {
        pkt_type,
        router_id: instance.state.router_id,
        area_id: iface.area_id,
    }
}

fn send_packet<S>(
    instance: &mut InstanceUpView<'_, S>,
    ifindex: u32,
    dst: Ipv4Addr,
    packet: &Packet,
) where
    S: Southbound,
{
    Debug::PacketTx(ifindex, &dst, packet).log();

    let data = packet.encode();
    instance.sb.send_packet(ifindex, dst, data);
}
