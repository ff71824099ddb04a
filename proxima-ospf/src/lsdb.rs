//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use chrono::Utc;
use proxima_utils::timer::TimerHandle;

use crate::debug::{Debug, LsaFlushReason};
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::packet::body::LsaBody;
use crate::packet::lsa::{Lsa, LsaKey, LsaType};
use crate::southbound::Southbound;
use crate::spf;
use crate::tasks::{self, LsaOrigKind};

// Architectural Constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_INIT_SEQ_NO: u32 = 0x8000_0001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fff_ffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x8000_0000;
pub const LSA_MIN_ARRIVAL: Duration = Duration::from_secs(1);
pub const LSDB_MAXAGE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct LsaEntry {
    // LSA data.
    pub data: Arc<Lsa>,
    // Expiry timer that triggers when the LSA age reaches MaxAge.
    pub expiry_timer: Option<TimerHandle>,
    // Refresh timer that triggers every LSA_REFRESH_TIME seconds.
    pub refresh_timer: Option<TimerHandle>,
    // LSA entry flags.
    pub flags: LsaEntryFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

// Link-state database: one keyed store per LSA type.
#[derive(Debug, Default)]
pub struct Lsdb {
    router: BTreeMap<LsaKey, LsaEntry>,
    l1_summary: BTreeMap<LsaKey, LsaEntry>,
    area: BTreeMap<LsaKey, LsaEntry>,
    l2_summary: BTreeMap<LsaKey, LsaEntry>,
    // Bodies whose sequence number is wrapping, re-originated with the
    // initial sequence number once the MaxAge flush completes.
    seqno_wrapping: HashMap<LsaKey, LsaBody>,
}

// ===== impl Lsdb =====

impl Lsdb {
    fn tree(&self, lsa_type: LsaType) -> &BTreeMap<LsaKey, LsaEntry> {
        match lsa_type {
            LsaType::Router => &self.router,
            LsaType::L1Summary => &self.l1_summary,
            LsaType::Area => &self.area,
            LsaType::L2Summary => &self.l2_summary,
        }
    }

    fn tree_mut(
        &mut self,
        lsa_type: LsaType,
    ) -> &mut BTreeMap<LsaKey, LsaEntry> {
        match lsa_type {
            LsaType::Router => &mut self.router,
            LsaType::L1Summary => &mut self.l1_summary,
            LsaType::Area => &mut self.area,
            LsaType::L2Summary => &mut self.l2_summary,
        }
    }

    pub fn get(&self, key: &LsaKey) -> Option<&LsaEntry> {
        self.tree(key.lsa_type).get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &LsaKey) -> Option<&mut LsaEntry> {
        self.tree_mut(key.lsa_type).get_mut(key)
    }

    pub(crate) fn insert(&mut self, key: LsaKey, lse: LsaEntry) {
        self.tree_mut(key.lsa_type).insert(key, lse);
    }

    pub(crate) fn remove(&mut self, key: &LsaKey) -> Option<LsaEntry> {
        self.tree_mut(key.lsa_type).remove(key)
    }

    // Iterates over every entry of every type.
    pub fn iter(&self) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> + '_ {
        self.router
            .iter()
            .chain(self.l1_summary.iter())
            .chain(self.area.iter())
            .chain(self.l2_summary.iter())
    }

    pub fn iter_type(
        &self,
        lsa_type: LsaType,
    ) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> + '_ {
        self.tree(lsa_type).iter()
    }

    pub fn len(&self) -> usize {
        self.router.len()
            + self.l1_summary.len()
            + self.area.len()
            + self.l2_summary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (&LsaKey, &mut LsaEntry)> + '_ {
        self.router
            .iter_mut()
            .chain(self.l1_summary.iter_mut())
            .chain(self.area.iter_mut())
            .chain(self.l2_summary.iter_mut())
    }

    // Forgets every timer handle, used when the instance is disabled and
    // the timer wheel has been cleared wholesale.
    pub(crate) fn clear_timer_handles(&mut self) {
        for (_, lse) in self.iter_mut() {
            lse.expiry_timer = None;
            lse.refresh_timer = None;
        }
    }

    // Stable hash over the Router-LSA store, used by drivers to check LSDB
    // convergence between routers.
    pub fn router_hash(&self) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        for (key, lse) in &self.router {
            key.hash(&mut hasher);
            lse.data.hdr.seq_no.hash(&mut hasher);
            lse.data.hdr.cksum.hash(&mut hasher);
        }
        hasher.finish()
    }
}

// ===== global functions =====

// Compares which LSA is more recent according to the rules specified in
// Section 13.1 of RFC 2328.
//
// Returns:
// - Ordering::Greater when `a` is more recent
// - Ordering::Less when `b` is more recent
// - Ordering::Equal when the two LSAs are considered to be identical
pub(crate) fn lsa_compare(a: &Lsa, b: &Lsa) -> Ordering {
    let a_seq_no = a.hdr.seq_no as i32;
    let b_seq_no = b.hdr.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.hdr.cksum.cmp(&b.hdr.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.hdr.is_maxage() && !b.hdr.is_maxage() {
        return Ordering::Greater;
    } else if !a.hdr.is_maxage() && b.hdr.is_maxage() {
        return Ordering::Less;
    }

    if a.hdr.age.abs_diff(b.hdr.age) > LSA_MAX_AGE_DIFF {
        return b.hdr.age.cmp(&a.hdr.age);
    }

    Ordering::Equal
}

// Compares two LSAs according to the rules specified in Section 13.2 of RFC
// 2328. Its purpose is to determine if the contents of the LSAs are
// identical.
pub(crate) fn lsa_same_contents(a: &Lsa, b: &Lsa) -> bool {
    if a.hdr.options != b.hdr.options {
        return false;
    }

    if a.hdr.is_maxage() ^ b.hdr.is_maxage() {
        return false;
    }

    if a.hdr.length != b.hdr.length {
        return false;
    }

    let hdr_length = crate::packet::lsa::LsaHdr::LENGTH as usize;
    a.raw[hdr_length..] == b.raw[hdr_length..]
}

// Checks if the given LSA was received via flooding less than MinLSArrival
// ago.
pub(crate) fn lsa_min_arrival_check(
    lse: &LsaEntry,
    now: std::time::Instant,
) -> bool {
    if !lse.flags.contains(LsaEntryFlags::RECEIVED) {
        return false;
    }

    match lse.data.base_time {
        Some(base_time) => {
            now.saturating_duration_since(base_time) < LSA_MIN_ARRIVAL
        }
        None => false,
    }
}

// Checks whether the LSA was (or should have been) originated by this
// router: our own Router-ID, or the area virtual node while we hold the
// leadership.
pub(crate) fn lsa_is_self_originated<S>(
    lsa: &Lsa,
    instance: &InstanceUpView<'_, S>,
) -> bool
where
    S: Southbound,
{
    if lsa.hdr.adv_rtr == instance.state.router_id {
        return true;
    }

    matches!(lsa.hdr.lsa_type, LsaType::Area | LsaType::L2Summary)
        && instance.state.leader.is_leader
        && lsa.hdr.adv_rtr == instance.state.home_area
}

// Installs the provided LSA to the LSDB.
//
// Returns true when the installation changed the LSA contents (or created or
// purged the entry), which is what gates SPF scheduling.
pub(crate) fn install<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    mut lsa: Lsa,
) -> bool
where
    S: Southbound,
{
    Debug::LsaInstall(&lsa.hdr).log();

    let key = lsa.hdr.key();

    // Age keeps advancing from the moment of installation.
    lsa.base_time = Some(instance.now);
    let lsa = Arc::new(lsa);

    // Remove old instance (if any) from all neighbors' Link state
    // retransmission lists.
    rxmt_lists_remove(instance, arenas, &lsa);

    // Remove old instance of the LSA.
    let old_lsa = match instance.state.lsdb.remove(&key) {
        Some(old_lse) => {
            for timer in [old_lse.expiry_timer, old_lse.refresh_timer]
                .into_iter()
                .flatten()
            {
                instance.timers.cancel(timer);
            }
            Some(old_lse.data)
        }
        None => None,
    };

    // Schedule the age-out of the new entry.
    let expiry_timer = (!lsa.hdr.is_maxage()).then(|| {
        let remaining = Duration::from_secs(
            LSA_MAX_AGE.saturating_sub(lsa.hdr.age) as u64,
        );
        tasks::lsa_expiry_timer(instance.timers, instance.now, remaining, key)
    });

    // Add LSA entry to LSDB.
    let mut lse = LsaEntry {
        data: lsa.clone(),
        expiry_timer,
        refresh_timer: None,
        flags: Default::default(),
    };

    // Check if the LSA is self-originated and mark it as such.
    if lsa_is_self_originated(&lsa, instance) {
        lse.flags.insert(LsaEntryFlags::SELF_ORIGINATED);
    }
    instance.state.lsdb.insert(key, lse);

    // MaxAge entries are reaped once no retransmission list carries them.
    if lsa.hdr.is_maxage() {
        maxage_sweep_start(instance);
    }

    // The contents of the new LSA should be compared to the old instance, if
    // present. If there is no difference, there is no need to recalculate
    // the routing table.
    let content_change = match &old_lsa {
        Some(old_lsa) => !lsa_same_contents(old_lsa, &lsa),
        None => true,
    };

    // Schedule SPF run if necessary.
    if content_change {
        spf::schedule(instance);
    }

    content_change
}

// Originates the provided LSA: installs it, floods it, and schedules its
// periodic refresh.
pub(crate) fn originate<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    lsa: Lsa,
) where
    S: Southbound,
{
    Debug::LsaOriginate(&lsa.hdr).log();

    let key = lsa.hdr.key();
    install(instance, arenas, lsa);

    let lse = match instance.state.lsdb.get(&key) {
        Some(lse) => lse,
        None => return,
    };
    let data = lse.data.clone();
    flood(instance, arenas, &data, None);

    // Update statistics.
    instance.state.orig_lsa_count += 1;
    instance.state.discontinuity_time = Utc::now();

    // Schedule LSA refreshing.
    let refresh_timer = tasks::lsa_refresh_timer(
        instance.timers,
        instance.now,
        Duration::from_secs(LSA_REFRESH_TIME as u64),
        key,
    );
    if let Some(lse) = instance.state.lsdb.get_mut(&key) {
        lse.refresh_timer = Some(refresh_timer);
    }
}

// Attempts to originate the provided LSA, but only if it passes a few
// checks.
pub(crate) fn originate_check<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    lsa_id: Ipv4Addr,
    adv_rtr: Ipv4Addr,
    body: LsaBody,
) where
    S: Southbound,
{
    let key = LsaKey::new(body.lsa_type(), adv_rtr, lsa_id);

    // When an attempt is made to increment the sequence number past the
    // maximum value, the current instance must first be flushed from the
    // routing domain. The new contents are originated with the initial
    // sequence number once the flush completes.
    if let Some(lse) = instance.state.lsdb.get(&key)
        && lse.data.hdr.seq_no == LSA_MAX_SEQ_NO
    {
        instance.state.lsdb.seqno_wrapping.insert(key, body);
        flush(instance, arenas, key, LsaFlushReason::PrematureAging);
        return;
    }

    // Get next sequence number.
    let seq_no = instance
        .state
        .lsdb
        .get(&key)
        .map(|lse| lse.data.hdr.seq_no.wrapping_add(1))
        .unwrap_or(LSA_INIT_SEQ_NO);

    // Make new LSA.
    let lsa = Lsa::new(0, 0, lsa_id, adv_rtr, seq_no, body);

    // If an LSA with identical contents already exists in the LSDB, skip
    // originating a new one. However, if the database copy was received
    // through flooding, proceed to originate a new instance with an updated
    // sequence number.
    if let Some(lse) = instance.state.lsdb.get(&key)
        && lsa_same_contents(&lse.data, &lsa)
        && !lse.flags.contains(LsaEntryFlags::RECEIVED)
        && !lse.data.hdr.is_maxage()
    {
        return;
    }

    // Effectively originate the LSA.
    originate(instance, arenas, lsa);
}

// Flushes an LSA from the LSDB by prematurely aging it to MaxAge and
// reflooding the withdrawal.
pub(crate) fn flush<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    key: LsaKey,
    reason: LsaFlushReason,
) where
    S: Southbound,
{
    let Some(lse) = instance.state.lsdb.get_mut(&key) else {
        return;
    };

    // Do not flush the same LSA more than once.
    if lse.data.hdr.is_maxage() {
        return;
    }

    Debug::LsaFlush(&lse.data.hdr, reason).log();

    // Set the LSA age to MaxAge.
    let mut lsa = (*lse.data).clone();
    lsa.set_maxage();

    // Install updated LSA to clear rxmt lists and rerun route calculations,
    // then reflood it.
    install(instance, arenas, lsa);
    if let Some(lse) = instance.state.lsdb.get(&key) {
        let data = lse.data.clone();
        flood(instance, arenas, &data, None);
    }
}

// Re-originates a self-originated LSA with a fresh sequence number before
// its age reaches MaxAge.
pub(crate) fn refresh<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    key: LsaKey,
) where
    S: Southbound,
{
    let Some(lse) = instance.state.lsdb.get(&key) else {
        return;
    };
    if !lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
        || lse.data.hdr.is_maxage()
    {
        return;
    }

    Debug::LsaRefresh(&lse.data.hdr).log();

    // Unlike a content-driven origination, a refresh always goes out, even
    // when the body is unchanged.
    let body = lse.data.body.clone();
    let seq_no = lse.data.hdr.seq_no;
    if seq_no == LSA_MAX_SEQ_NO {
        instance.state.lsdb.seqno_wrapping.insert(key, body);
        flush(instance, arenas, key, LsaFlushReason::PrematureAging);
        return;
    }

    let lsa = Lsa::new(
        0,
        0,
        key.lsa_id,
        key.adv_rtr,
        seq_no.wrapping_add(1),
        body,
    );
    originate(instance, arenas, lsa);
}

// Removes MaxAge LSAs that are no longer on any neighbor's retransmission
// list. Bodies parked for sequence number wrapping restart at the initial
// sequence number.
pub(crate) fn maxage_sweep<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
) where
    S: Southbound,
{
    instance.state.lsdb_maxage_sweep_timer = None;

    let maxage_keys = instance
        .state
        .lsdb
        .iter()
        .filter(|(_, lse)| lse.data.hdr.is_maxage())
        .map(|(key, _)| *key)
        .collect::<Vec<_>>();

    let mut remaining = false;
    for key in maxage_keys {
        let rxmt_pending = arenas
            .neighbors
            .iter()
            .any(|(_, nbr)| nbr.lists.ls_rxmt.contains_key(&key));
        if rxmt_pending {
            remaining = true;
            continue;
        }

        if let Some(lse) = instance.state.lsdb.remove(&key) {
            for timer in [lse.expiry_timer, lse.refresh_timer]
                .into_iter()
                .flatten()
            {
                instance.timers.cancel(timer);
            }
        }

        // Restart a wrapped sequence number.
        if let Some(body) = instance.state.lsdb.seqno_wrapping.remove(&key) {
            let lsa = Lsa::new(
                0,
                0,
                key.lsa_id,
                key.adv_rtr,
                LSA_INIT_SEQ_NO,
                body,
            );
            originate(instance, arenas, lsa);
        }
    }

    if remaining {
        maxage_sweep_start(instance);
    }
}

// Re-arms the expiry and refresh timers of every stored LSA, used when the
// instance is re-enabled after a disable cleared the timer wheel.
pub(crate) fn rearm_timers<S>(instance: &mut InstanceUpView<'_, S>)
where
    S: Southbound,
{
    let entries = instance
        .state
        .lsdb
        .iter()
        .map(|(key, lse)| {
            (
                *key,
                lse.data.age(instance.now),
                lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED),
            )
        })
        .collect::<Vec<_>>();

    let mut any_maxage = false;
    for (key, age, self_originated) in entries {
        if age >= LSA_MAX_AGE {
            any_maxage = true;
            continue;
        }

        let expiry = tasks::lsa_expiry_timer(
            instance.timers,
            instance.now,
            Duration::from_secs((LSA_MAX_AGE - age) as u64),
            key,
        );
        let refresh = self_originated.then(|| {
            let remaining = LSA_REFRESH_TIME.saturating_sub(age).max(1);
            tasks::lsa_refresh_timer(
                instance.timers,
                instance.now,
                Duration::from_secs(remaining as u64),
                key,
            )
        });
        if let Some(lse) = instance.state.lsdb.get_mut(&key) {
            lse.expiry_timer = Some(expiry);
            lse.refresh_timer = refresh;
        }
    }

    if any_maxage {
        maxage_sweep_start(instance);
    }
}

// Arms the MaxAge sweeper unless it's already pending.
pub(crate) fn maxage_sweep_start<S>(instance: &mut InstanceUpView<'_, S>)
where
    S: Southbound,
{
    if instance.state.lsdb_maxage_sweep_timer.is_none() {
        instance.state.lsdb_maxage_sweep_timer =
            Some(tasks::lsdb_maxage_sweep_timer(
                instance.timers,
                instance.now,
                LSDB_MAXAGE_SWEEP_INTERVAL,
            ));
    }
}

// Maps an LSA key to the origination throttle bucket it belongs to.
pub(crate) fn orig_kind(lsa_type: LsaType) -> LsaOrigKind {
    match lsa_type {
        LsaType::Router => LsaOrigKind::Router,
        LsaType::L1Summary => LsaOrigKind::L1Summary,
        LsaType::Area | LsaType::L2Summary => LsaOrigKind::AreaProxy,
    }
}

// Removes old instance of the given LSA from all neighbors' Link state
// retransmission lists.
fn rxmt_lists_remove<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    lsa: &Arc<Lsa>,
) where
    S: Southbound,
{
    let key = lsa.hdr.key();
    let mut stopped = vec![];
    for (ifindex, nbr) in arenas.neighbors.iter_mut() {
        if let Some(old_lsa) = nbr.lists.ls_rxmt.get(&key) {
            // Remove LSA from the rxmt list as long as it's an older
            // version.
            if lsa_compare(old_lsa, lsa) == Ordering::Less {
                nbr.lists.ls_rxmt.remove(&key);
                if nbr.lists.ls_rxmt.is_empty() {
                    stopped.push((ifindex, nbr.router_id));
                }
            }
        }
    }
    for (ifindex, router_id) in stopped {
        if let Some(nbr) = arenas.neighbors.get_mut(ifindex, router_id) {
            nbr.rxmt_lsupd_stop_check(instance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::body::{LsaBody, LsaRouter, LsaRouterFlags};

    fn lsa(seq_no: u32, age: u16) -> Lsa {
        let body = LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::empty(),
            links: vec![],
        });
        let mut lsa = Lsa::new(
            0,
            0,
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(1, 1, 1, 1),
            seq_no,
            body,
        );
        lsa.set_age(age);
        lsa
    }

    #[test]
    fn arbitration_prefers_higher_seq_no() {
        let a = lsa(LSA_INIT_SEQ_NO + 1, 0);
        let b = lsa(LSA_INIT_SEQ_NO, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn arbitration_prefers_maxage() {
        let a = lsa(LSA_INIT_SEQ_NO, LSA_MAX_AGE);
        let b = lsa(LSA_INIT_SEQ_NO, 100);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn arbitration_ignores_small_age_difference() {
        let a = lsa(LSA_INIT_SEQ_NO, 10);
        let b = lsa(LSA_INIT_SEQ_NO, 200);
        assert_eq!(lsa_compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn arbitration_prefers_fresher_beyond_maxagediff() {
        let a = lsa(LSA_INIT_SEQ_NO, 10);
        let b = lsa(LSA_INIT_SEQ_NO, 1000);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn same_contents_ignores_age() {
        let a = lsa(LSA_INIT_SEQ_NO, 10);
        let b = lsa(LSA_INIT_SEQ_NO, 500);
        assert!(lsa_same_contents(&a, &b));
        assert!(!lsa_same_contents(&a, &lsa(LSA_INIT_SEQ_NO, LSA_MAX_AGE)));
    }
}
