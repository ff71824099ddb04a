//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use smallvec::{SmallVec, smallvec};

use crate::debug::Debug;
use crate::error::{Error, InterfaceCfgError};
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView, OrigThrottle};
use crate::interface::Interface;
use crate::leader;
use crate::lsdb::{self, LsaEntryFlags};
use crate::neighbor::{Neighbor, nsm};
use crate::output;
use crate::packet::lsa::{Lsa, LsaHdr, LsaScope};
use crate::packet::{Hello, LsAck, LsUpdate, Packet, PacketType};
use crate::southbound::Southbound;
use crate::spf;
use crate::tasks::{self, LsaOrigKind};

// Origination throttling bounds: a rapid re-trigger doubles the minimum
// interval between successive originations of the same kind, up to the cap.
pub const LSA_ORIG_INTERVAL_MIN: Duration = Duration::from_secs(1);
pub const LSA_ORIG_INTERVAL_MAX: Duration = Duration::from_secs(8);

// ===== packet input =====

pub(crate) fn process_packet<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    src: Ipv4Addr,
    data: &[u8],
) -> Result<(), Error>
where
    S: Southbound,
{
    let iface = arenas
        .interfaces
        .get(ifindex)
        .ok_or(Error::InterfaceNotFound(ifindex))?;
    if !iface.is_ready() {
        return Ok(());
    }

    // Decode the packet; malformed input is dropped silently (and counted).
    let packet = match Packet::decode(data) {
        Ok(packet) => packet,
        Err(error) => {
            instance.state.rx_error_count += 1;
            return Err(Error::PacketDecodeError(error));
        }
    };

    Debug::PacketRx(ifindex, &src, &packet).log();

    match packet {
        Packet::Hello(hello) => {
            process_packet_hello(instance, arenas, ifindex, src, hello)
        }
        Packet::LsUpdate(ls_upd) => {
            process_packet_lsupd(instance, arenas, ifindex, src, ls_upd)
        }
        Packet::LsAck(ls_ack) => {
            process_packet_lsack(instance, arenas, ifindex, ls_ack)
        }
    }
}

fn process_packet_hello<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    src: Ipv4Addr,
    hello: Hello,
) -> Result<(), Error>
where
    S: Southbound,
{
    let iface = match arenas.interfaces.get(ifindex) {
        Some(iface) => iface,
        None => return Err(Error::InterfaceNotFound(ifindex)),
    };
    let router_id = hello.hdr.router_id;

    // Perform all the required sanity checks.
    process_packet_hello_sanity_checks(instance, iface, &hello).map_err(
        |error| {
            Error::InterfaceCfgError(ifindex, src, PacketType::Hello, error)
        },
    )?;

    // Find or create new neighbor.
    if arenas.neighbors.get(ifindex, router_id).is_none() {
        arenas.neighbors.insert(
            ifindex,
            Neighbor::new(router_id, src, hello.hdr.area_id),
        );
    }
    let Some(nbr) = arenas.neighbors.get_mut(ifindex, router_id) else {
        return Ok(());
    };

    // Update neighbor's source address and area.
    nbr.src = src;
    nbr.area_id = hello.hdr.area_id;

    // Trigger the HelloReceived event.
    nbr.fsm(iface, instance, nsm::Event::HelloRcvd);

    // Trigger the 1-WayReceived or the 2-WayReceived event.
    if hello.neighbors.contains(&instance.state.router_id) {
        nbr.fsm(iface, instance, nsm::Event::TwoWayRcvd);
    } else {
        nbr.fsm(iface, instance, nsm::Event::OneWayRcvd);
    }

    Ok(())
}

fn process_packet_hello_sanity_checks<S>(
    instance: &InstanceUpView<'_, S>,
    iface: &Interface,
    hello: &Hello,
) -> Result<(), InterfaceCfgError>
where
    S: Southbound,
{
    // Cross-area Hellos are only acceptable when the area-proxy extension is
    // running.
    if hello.hdr.area_id != iface.area_id
        && !instance.config.enable_area_proxy
    {
        return Err(InterfaceCfgError::AreaIdMismatch(
            hello.hdr.area_id,
            iface.area_id,
        ));
    }

    // Check for mask/HelloInterval/RouterDeadInterval mismatches.
    iface.validate_hello(
        hello,
        instance.config.dead_interval.as_secs() as u32,
        instance.config.hello_interval.as_secs() as u16,
    )?;

    // Check for duplicate Router ID.
    if hello.hdr.router_id == instance.state.router_id {
        return Err(InterfaceCfgError::DuplicateRouterId(
            hello.hdr.router_id,
        ));
    }

    Ok(())
}

fn process_packet_lsupd<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    src: Ipv4Addr,
    ls_upd: LsUpdate,
) -> Result<(), Error>
where
    S: Southbound,
{
    let router_id = ls_upd.hdr.router_id;
    let nbr = arenas
        .neighbors
        .get(ifindex, router_id)
        .ok_or(Error::UnknownNeighbor(src, router_id))?;
    if nbr.state < nsm::State::Init {
        Debug::PacketRxIgnore(router_id, &nbr.state).log();
        return Ok(());
    }

    // Process all LSAs contained in the packet, then acknowledge them in a
    // single LS Ack.
    let mut acks: SmallVec<[LsaHdr; 4]> = smallvec![];
    for lsa in ls_upd.lsas {
        process_packet_lsupd_lsa(
            instance, arenas, ifindex, router_id, src, lsa, &mut acks,
        );
    }

    if let Some(iface) = arenas.interfaces.get(ifindex) {
        output::send_lsack(instance, iface, src, acks.into_vec());
    }

    Ok(())
}

fn process_packet_lsupd_lsa<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    router_id: Ipv4Addr,
    src: Ipv4Addr,
    lsa: Lsa,
    acks: &mut SmallVec<[LsaHdr; 4]>,
) where
    S: Southbound,
{
    // (1) Validate the LSA checksum and fields.
    if let Err(error) = lsa.validate() {
        instance.state.rx_error_count += 1;
        Debug::LsaDiscard(router_id, &lsa.hdr, &error).log();
        return;
    }

    // (2) Area-scoped LSAs are not accepted over cross-area adjacencies.
    if lsa.hdr.lsa_type.scope() == LsaScope::Area
        && let Some(iface) = arenas.interfaces.get(ifindex)
        && let Some(nbr) = arenas.neighbors.get(ifindex, router_id)
        && nbr.is_cross_area(iface)
    {
        return;
    }

    // (3) Find the instance of this LSA that is currently contained in the
    // link state database.
    let lsa_key = lsa.hdr.key();
    let lse = instance.state.lsdb.get(&lsa_key);

    // (4) If the LSA's LS age is equal to MaxAge and there is currently no
    // instance in the database, acknowledge without installing.
    if lsa.hdr.is_maxage() && lse.is_none() {
        acks.push(lsa.hdr);
        return;
    }

    // (5) There is no database copy, or the received LSA is more recent
    // than the database copy.
    let lsa_cmp = lse.map(|lse| lsdb::lsa_compare(&lse.data, &lsa));
    if matches!(lsa_cmp, None | Some(Ordering::Less)) {
        // (5.a) MinLSArrival check.
        if let Some(lse) = lse
            && lsdb::lsa_min_arrival_check(lse, instance.now)
        {
            Debug::LsaMinArrivalDiscard(router_id, &lsa.hdr).log();
            return;
        }

        // (5.b) Immediately flood the new LSA out some subset of the
        // router's interfaces.
        let mut lsa_flood = lsa.clone();
        lsa_flood.base_time = Some(instance.now);
        let lsa_arc = Arc::new(lsa_flood);
        flood(instance, arenas, &lsa_arc, Some((ifindex, router_id)));

        // (5.d) Install the new LSA in the link state database (replacing
        // the current database copy).
        lsdb::install(instance, arenas, lsa);
        if let Some(lse) = instance.state.lsdb.get_mut(&lsa_key) {
            lse.flags.insert(LsaEntryFlags::RECEIVED);
        }

        // Update statistics.
        instance.state.rx_lsa_count += 1;
        instance.state.discontinuity_time = Utc::now();

        // (5.e) Acknowledge the receipt of the LSA.
        acks.push(lsa_arc.hdr);

        // (5.f) Check if this is a self-originated LSA. Receiving a newer
        // instance of our own LSA prompts a re-origination with a higher
        // sequence number.
        if let Some(lse) = instance.state.lsdb.get(&lsa_key)
            && lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
        {
            Debug::LsaSelfOriginated(router_id, &lse.data.hdr).log();
            instance
                .state
                .pending_orig
                .insert(lsdb::orig_kind(lsa_key.lsa_type));
        }

        return;
    }

    // (6) Check if the received LSA is the same instance as the database
    // copy (i.e., neither one is more recent).
    if lsa_cmp == Some(Ordering::Equal) {
        // Check if this LSA can be handled as an implied acknowledgment.
        let mut implied_ack = false;
        if let Some(nbr) = arenas.neighbors.get_mut(ifindex, router_id)
            && nbr.lists.ls_rxmt.remove(&lsa_key).is_some()
        {
            nbr.rxmt_lsupd_stop_check(instance);
            implied_ack = true;
        }

        // Send a direct ack for duplicates that arrived unsolicited.
        if !implied_ack {
            acks.push(lsa.hdr);
        }

        return;
    }

    // (8) The database copy is more recent.
    let Some(lse) = instance.state.lsdb.get(&lsa_key) else {
        return;
    };

    // If the database copy has LS age equal to MaxAge and LS sequence
    // number equal to MaxSequenceNumber, simply discard the received LSA
    // without acknowledging it.
    if lse.data.hdr.is_maxage()
        && lse.data.hdr.seq_no == lsdb::LSA_MAX_SEQ_NO
    {
        return;
    }

    if !lsdb::lsa_min_arrival_check(lse, instance.now) {
        // Send the database copy back to the sending neighbor,
        // encapsulated within a Link State Update packet.
        let stored = lse.data.clone();
        if let Some(iface) = arenas.interfaces.get(ifindex) {
            output::send_lsupd(instance, iface, src, &[stored]);
        }
    } else {
        Debug::LsaMinArrivalDiscard(router_id, &lsa.hdr).log();
    }
}

fn process_packet_lsack<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    ls_ack: LsAck,
) -> Result<(), Error>
where
    S: Southbound,
{
    let router_id = ls_ack.hdr.router_id;
    let Some(nbr) = arenas.neighbors.get_mut(ifindex, router_id) else {
        // Acks from unknown neighbors are silently ignored.
        return Ok(());
    };

    for lsa_hdr in ls_ack.lsa_hdrs {
        let lsa_key = lsa_hdr.key();

        // An acknowledgment only clears the retransmission entry when it
        // matches the instance awaiting the ack.
        if let Some(rxmt) = nbr.lists.ls_rxmt.get(&lsa_key)
            && rxmt.hdr.seq_no == lsa_hdr.seq_no
            && rxmt.hdr.cksum == lsa_hdr.cksum
        {
            nbr.lists.ls_rxmt.remove(&lsa_key);
        }
    }
    nbr.rxmt_lsupd_stop_check(instance);

    Ok(())
}

// ===== timer events =====

pub(crate) fn process_hello_interval<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
) where
    S: Southbound,
{
    let Some(iface) = arenas.interfaces.get_mut(ifindex) else {
        return;
    };
    iface.tasks.hello_interval = None;
    if !iface.is_ready() {
        return;
    }

    output::send_hello(instance, iface, &arenas.neighbors);

    // Rearm the Hello timer, jitter-free.
    let interval = instance.config.hello_interval;
    iface.hello_interval_start(instance, interval);
}

pub(crate) fn process_nsm_inactivity<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    router_id: Ipv4Addr,
) where
    S: Southbound,
{
    let Some(iface) = arenas.interfaces.get(ifindex) else {
        return;
    };
    let Some(nbr) = arenas.neighbors.get_mut(ifindex, router_id) else {
        return;
    };

    // The inactivity timer fired, so its handle is gone already.
    nbr.tasks.inactivity_timer = None;
    nbr.fsm(iface, instance, nsm::Event::InactivityTimer);

    // Dead neighbors are removed; a re-appearing neighbor recreates its
    // record with the first valid Hello.
    if nbr.state == nsm::State::Down {
        nbr.cancel_timers(instance);
        arenas.neighbors.remove(ifindex, router_id);
    }
}

pub(crate) fn process_rxmt_interval<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    router_id: Ipv4Addr,
) where
    S: Southbound,
{
    let Some(iface) = arenas.interfaces.get(ifindex) else {
        return;
    };
    let Some(nbr) = arenas.neighbors.get_mut(ifindex, router_id) else {
        return;
    };

    nbr.tasks.rxmt_lsupd = None;
    if nbr.lists.ls_rxmt.is_empty() {
        return;
    }

    output::rxmt_lsupd(instance, iface, nbr);

    // Rearm with a fixed interval; there is no attempt cap, stuck neighbors
    // are reaped by the inactivity timer instead.
    nbr.rxmt_lsupd_start_check(iface, instance);
}

pub(crate) fn process_lsa_orig_delayed<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    kind: LsaOrigKind,
) where
    S: Southbound,
{
    if let Some(throttle) = instance.state.orig_throttle.get_mut(&kind) {
        throttle.delayed = None;
    }
    originate_kind(instance, arenas, kind);
}

// ===== LSA origination =====

// Runs a throttled origination of the given LSA kind.
pub(crate) fn process_lsa_orig<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    kind: LsaOrigKind,
) where
    S: Southbound,
{
    let now = instance.now;
    let throttle = instance
        .state
        .orig_throttle
        .entry(kind)
        .or_insert_with(OrigThrottle::default);

    if let Some(last) = throttle.last_orig
        && now < last + throttle.interval
    {
        // Rapid re-trigger: postpone and back off.
        if throttle.delayed.is_none() {
            throttle.delayed = Some(tasks::lsa_orig_delayed_timer(
                instance.timers,
                last + throttle.interval,
                kind,
            ));
        }
        throttle.interval =
            std::cmp::min(throttle.interval * 2, LSA_ORIG_INTERVAL_MAX);
        return;
    }

    // A quiet period resets the backoff.
    if let Some(last) = throttle.last_orig
        && now >= last + throttle.interval * 2
    {
        throttle.interval = LSA_ORIG_INTERVAL_MIN;
    }

    originate_kind(instance, arenas, kind);
}

fn originate_kind<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    kind: LsaOrigKind,
) where
    S: Southbound,
{
    if !instance.state.enabled {
        return;
    }

    if let Some(throttle) = instance.state.orig_throttle.get_mut(&kind) {
        throttle.last_orig = Some(instance.now);
    }

    match kind {
        LsaOrigKind::Router => originate_router_lsa(instance, arenas),
        LsaOrigKind::L1Summary => originate_l1_summary(instance, arenas),
        LsaOrigKind::AreaProxy => {
            leader::originate_proxy_lsas(instance, arenas)
        }
    }
}

// Composes and originates our Router-LSA from the current adjacencies and
// connected networks.
pub(crate) fn originate_router_lsa<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    use crate::packet::body::{
        LsaBody, LsaRouter, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType,
    };

    let mut flags = LsaRouterFlags::empty();
    let mut links = vec![];
    for iface in arenas.interfaces.iter() {
        if !iface.is_ready() {
            continue;
        }

        for nbr in arenas.neighbors.iter_by_iface(iface.ifindex) {
            if nbr.state < nsm::State::Full {
                continue;
            }
            if nbr.is_cross_area(iface) {
                // Cross-area adjacency: link-id carries the peer area,
                // link-data the remote Router-ID.
                flags.insert(LsaRouterFlags::B);
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::AreaProxy,
                    nbr.area_id,
                    nbr.router_id,
                    iface.metric,
                ));
            } else {
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::PointToPoint,
                    nbr.router_id,
                    iface.addr,
                    iface.metric,
                ));
            }
        }

        // Stub link for the connected network.
        if let Some(network) = iface.network() {
            links.push(LsaRouterLink::new(
                LsaRouterLinkType::Stub,
                network.ip(),
                network.mask(),
                iface.metric,
            ));
        }
    }

    let router_id = instance.state.router_id;
    let body = LsaBody::Router(LsaRouter { flags, links });
    lsdb::originate_check(instance, arenas, router_id, router_id, body);
}

// Composes and originates our L1-Summary-LSA from the locally advertised
// prefix set.
pub(crate) fn originate_l1_summary<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    use crate::packet::body::{LsaBody, LsaSummary, LsaSummaryPrefix};

    let mut prefixes = std::collections::BTreeSet::new();

    // Explicitly advertised reachable addresses.
    for prefix in &instance.state.advertised_prefixes {
        prefixes.insert(LsaSummaryPrefix::new(
            prefix.ip(),
            prefix.mask(),
            0,
        ));
    }

    // Gateway routers inject the default route into the area.
    if instance.state.gateway.is_some() {
        prefixes.insert(LsaSummaryPrefix::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            0,
        ));
    }

    let router_id = instance.state.router_id;
    let body = LsaBody::L1Summary(LsaSummary {
        prefixes: prefixes.into_iter().collect(),
    });
    lsdb::originate_check(instance, arenas, router_id, router_id, body);
}

// ===== SPF / leader follow-ups =====

pub(crate) fn process_spf_delay<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    if let Err(error) = spf::fsm(spf::fsm::Event::DelayTimer, instance, arenas)
    {
        error.log();
    }
}

pub(crate) fn process_spf_hold_down<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    if let Err(error) =
        spf::fsm(spf::fsm::Event::HoldDownTimer, instance, arenas)
    {
        error.log();
    }
}
