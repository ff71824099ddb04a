//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use proxima_utils::timer::{TimerHandle, TimerWheel};
use serde::{Deserialize, Serialize};

use crate::packet::lsa::LsaKey;

//
// Timer message diagram:
//
//                                  +--------------+
//           hello_interval (Nx) -> |              |
//     nsm_inactivity_timer (Nx) -> |              |
//     packet_rxmt_interval (Nx) -> |              |
//                                  |              |
//          lsa_expiry_timer (Nx) -> |             |
//         lsa_refresh_timer (Nx) -> |   instance  |
//    lsa_orig_delayed_timer (Nx) -> |             |
//  lsdb_maxage_sweep_timer (1x) -> |              |
//                                  |              |
//           spf_delay_timer (1x) -> |             |
//       spf_hold_down_timer (1x) -> |             |
//     leader_debounce_timer (1x) -> |             |
//      interface_sync_timer (1x) -> |             |
//                                  +--------------+
//
// All deferred work is a message on the instance's timer wheel; the driver
// drains due messages with `Instance::process_timers`.
//

// Timer messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum TimerMsg {
    HelloInterval { ifindex: u32 },
    NsmInactivity { ifindex: u32, router_id: Ipv4Addr },
    RxmtInterval { ifindex: u32, router_id: Ipv4Addr },
    LsaExpiry { key: LsaKey },
    LsaRefresh { key: LsaKey },
    LsaOrigDelayed { kind: LsaOrigKind },
    LsdbMaxAgeSweep,
    SpfDelay,
    SpfHoldDown,
    LeaderDebounce,
    InterfaceSync,
}

// Kinds of self-originated LSAs, used to throttle origination bursts.
//
// The two leader-only types are recomputed together and share one throttle.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaOrigKind {
    Router,
    L1Summary,
    AreaProxy,
}

// ===== global functions =====

pub(crate) fn hello_interval(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    interval: Duration,
    ifindex: u32,
) -> TimerHandle {
    timers.schedule(now + interval, TimerMsg::HelloInterval { ifindex })
}

pub(crate) fn nsm_inactivity_timer(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    dead_interval: Duration,
    ifindex: u32,
    router_id: Ipv4Addr,
) -> TimerHandle {
    timers.schedule(
        now + dead_interval,
        TimerMsg::NsmInactivity { ifindex, router_id },
    )
}

pub(crate) fn packet_rxmt_interval(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    rxmt_interval: Duration,
    ifindex: u32,
    router_id: Ipv4Addr,
) -> TimerHandle {
    timers.schedule(
        now + rxmt_interval,
        TimerMsg::RxmtInterval { ifindex, router_id },
    )
}

pub(crate) fn lsa_expiry_timer(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    remaining: Duration,
    key: LsaKey,
) -> TimerHandle {
    timers.schedule(now + remaining, TimerMsg::LsaExpiry { key })
}

pub(crate) fn lsa_refresh_timer(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    refresh_interval: Duration,
    key: LsaKey,
) -> TimerHandle {
    timers.schedule(now + refresh_interval, TimerMsg::LsaRefresh { key })
}

pub(crate) fn lsa_orig_delayed_timer(
    timers: &mut TimerWheel<TimerMsg>,
    deadline: Instant,
    kind: LsaOrigKind,
) -> TimerHandle {
    timers.schedule(deadline, TimerMsg::LsaOrigDelayed { kind })
}

pub(crate) fn lsdb_maxage_sweep_timer(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    interval: Duration,
) -> TimerHandle {
    timers.schedule(now + interval, TimerMsg::LsdbMaxAgeSweep)
}

pub(crate) fn spf_delay_timer(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    delay: Duration,
) -> TimerHandle {
    timers.schedule(now + delay, TimerMsg::SpfDelay)
}

pub(crate) fn spf_hold_down_timer(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    hold_down: Duration,
) -> TimerHandle {
    timers.schedule(now + hold_down, TimerMsg::SpfHoldDown)
}

pub(crate) fn leader_debounce_timer(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    window: Duration,
) -> TimerHandle {
    timers.schedule(now + window, TimerMsg::LeaderDebounce)
}

pub(crate) fn interface_sync_timer(
    timers: &mut TimerWheel<TimerMsg>,
    now: Instant,
    interval: Duration,
) -> TimerHandle {
    timers.schedule(now + interval, TimerMsg::InterfaceSync)
}
