//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::neighbor::nsm;
use crate::packet::Packet;
use crate::packet::error::LsaValidationError;
use crate::packet::lsa::LsaHdr;
use crate::spf;

// Debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceEnable,
    InstanceDisable,
    // Interfaces
    InterfaceAttach(u32),
    InterfaceUp(u32),
    InterfaceDown(u32),
    // Neighbors
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    // Network
    PacketRx(u32, &'a Ipv4Addr, &'a Packet),
    PacketTx(u32, &'a Ipv4Addr, &'a Packet),
    PacketRxIgnore(Ipv4Addr, &'a nsm::State),
    // Flooding
    LsaDiscard(Ipv4Addr, &'a LsaHdr, &'a LsaValidationError),
    LsaMinArrivalDiscard(Ipv4Addr, &'a LsaHdr),
    LsaSelfOriginated(Ipv4Addr, &'a LsaHdr),
    // LSDB maintenance
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaOriginateMinInterval(&'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaRefresh(&'a LsaHdr),
    // SPF
    SpfDelayFsmEvent(&'a spf::fsm::State, &'a spf::fsm::Event),
    SpfDelayFsmTransition(&'a spf::fsm::State, &'a spf::fsm::State),
    SpfRunStart,
    // Area leader
    LeaderCandidateChange(Option<Ipv4Addr>),
    LeaderAssume(Ipv4Addr),
    LeaderCede(Ipv4Addr),
}

// Reason why an LSA is being flushed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceEnable | Debug::InstanceDisable => {
                debug!("{}", self);
            }
            Debug::InterfaceAttach(ifindex)
            | Debug::InterfaceUp(ifindex)
            | Debug::InterfaceDown(ifindex) => {
                debug_span!("interface", %ifindex).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NsmEvent(router_id, state, event) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    })
                })
            }
            Debug::NsmTransition(router_id, old_state, new_state) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                })
            }
            Debug::PacketRx(ifindex, src, packet) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(%ifindex, %src, ?packet, "{}", self);
                    })
                })
            }
            Debug::PacketTx(ifindex, dst, packet) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(%ifindex, %dst, ?packet, "{}", self);
                    })
                })
            }
            Debug::PacketRxIgnore(router_id, state) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?state, "{}", self);
                })
            }
            Debug::LsaDiscard(router_id, lsa_hdr, error) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?lsa_hdr, %error, "{}", self);
                })
            }
            Debug::LsaMinArrivalDiscard(router_id, lsa_hdr)
            | Debug::LsaSelfOriginated(router_id, lsa_hdr) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::LsaInstall(lsa_hdr)
            | Debug::LsaOriginate(lsa_hdr)
            | Debug::LsaOriginateMinInterval(lsa_hdr)
            | Debug::LsaRefresh(lsa_hdr) => {
                debug!(?lsa_hdr, "{}", self);
            }
            Debug::LsaFlush(lsa_hdr, reason) => {
                debug!(?lsa_hdr, ?reason, "{}", self);
            }
            Debug::SpfDelayFsmEvent(state, event) => {
                debug_span!("fsm").in_scope(|| {
                    debug!(?state, ?event, "{}", self);
                })
            }
            Debug::SpfDelayFsmTransition(old_state, new_state) => {
                debug_span!("fsm").in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                })
            }
            Debug::SpfRunStart => {
                debug!("{}", self);
            }
            Debug::LeaderCandidateChange(candidate) => {
                debug!(?candidate, "{}", self);
            }
            Debug::LeaderAssume(router_id) | Debug::LeaderCede(router_id) => {
                debug!(%router_id, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceEnable => {
                write!(f, "instance enabled")
            }
            Debug::InstanceDisable => {
                write!(f, "instance disabled")
            }
            Debug::InterfaceAttach(..) => {
                write!(f, "interface attached")
            }
            Debug::InterfaceUp(..) => {
                write!(f, "interface up")
            }
            Debug::InterfaceDown(..) => {
                write!(f, "interface down")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::NsmEvent(..) => {
                write!(f, "neighbor FSM event")
            }
            Debug::NsmTransition(..) => {
                write!(f, "neighbor FSM state transition")
            }
            Debug::PacketRx(..) => {
                write!(f, "packet received")
            }
            Debug::PacketTx(..) => {
                write!(f, "packet sent")
            }
            Debug::PacketRxIgnore(..) => {
                write!(f, "packet ignored")
            }
            Debug::LsaDiscard(..) => {
                write!(f, "discarding LSA")
            }
            Debug::LsaMinArrivalDiscard(..) => {
                write!(f, "discarding LSA received too frequently")
            }
            Debug::LsaSelfOriginated(..) => {
                write!(f, "received self-originated LSA")
            }
            Debug::LsaInstall(..) => {
                write!(f, "installing LSA")
            }
            Debug::LsaOriginate(..) => {
                write!(f, "originating LSA")
            }
            Debug::LsaOriginateMinInterval(..) => {
                write!(f, "postponing LSA origination")
            }
            Debug::LsaFlush(..) => {
                write!(f, "flushing LSA")
            }
            Debug::LsaRefresh(..) => {
                write!(f, "refreshing LSA")
            }
            Debug::SpfDelayFsmEvent(..) => {
                write!(f, "SPF Delay FSM event")
            }
            Debug::SpfDelayFsmTransition(..) => {
                write!(f, "SPF Delay FSM state transition")
            }
            Debug::SpfRunStart => {
                write!(f, "starting SPF calculation")
            }
            Debug::LeaderCandidateChange(..) => {
                write!(f, "area leader candidate changed")
            }
            Debug::LeaderAssume(..) => {
                write!(f, "assuming area leadership")
            }
            Debug::LeaderCede(..) => {
                write!(f, "ceding area leadership")
            }
        }
    }
}
