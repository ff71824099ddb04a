//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{warn, warn_span};

use crate::neighbor::nsm;
use crate::packet::PacketType;
use crate::packet::error::DecodeError;
use crate::spf;

// Protocol errors.
//
// Everything here is recovered locally: errors are logged and counted, and
// never surface to the driver except through the snapshot import results.
#[derive(Debug)]
pub enum Error {
    InterfaceNotFound(u32),
    // Packet input
    PacketDecodeError(DecodeError),
    UnknownNeighbor(Ipv4Addr, Ipv4Addr),
    InterfaceCfgError(u32, Ipv4Addr, PacketType, InterfaceCfgError),
    // SPF
    SpfRootNotFound(Ipv4Addr),
    // Other
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    SpfDelayUnexpectedEvent(spf::fsm::State, spf::fsm::Event),
    // Snapshot
    ImportError(ImportError),
}

// Interface configuration errors detected on received Hellos.
#[derive(Debug)]
pub enum InterfaceCfgError {
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    HelloMaskMismatch(Ipv4Addr, Ipv4Addr),
    HelloIntervalMismatch(u16, u16),
    DeadIntervalMismatch(u32, u32),
    DuplicateRouterId(Ipv4Addr),
}

// Snapshot import errors. A failed import always leaves the in-memory state
// unchanged.
#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Truncated,
    InterfaceCountMismatch(u32, u32),
    BadLsa(DecodeError),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::InterfaceNotFound(ifindex) => {
                warn!(%ifindex, "{}", self);
            }
            Error::PacketDecodeError(error) => {
                warn!(%error, "{}", self);
            }
            Error::UnknownNeighbor(source, router_id) => {
                warn!(%source, %router_id, "{}", self);
            }
            Error::InterfaceCfgError(ifindex, source, _, error) => {
                warn_span!("interface", %ifindex, %source).in_scope(|| {
                    error.log();
                })
            }
            Error::SpfRootNotFound(area_id) => {
                warn!(%area_id, "{}", self);
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn!(?state, ?event, "{}", self);
                })
            }
            Error::SpfDelayUnexpectedEvent(state, event) => {
                warn!(?state, ?event, "{}", self);
            }
            Error::ImportError(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InterfaceNotFound(..) => {
                write!(f, "interface not found")
            }
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "unknown neighbor")
            }
            Error::InterfaceCfgError(..) => {
                write!(f, "interface configuration error")
            }
            Error::SpfRootNotFound(..) => {
                write!(f, "SPF root not found")
            }
            Error::NsmUnexpectedEvent(..) => {
                write!(f, "unexpected NSM event")
            }
            Error::SpfDelayUnexpectedEvent(..) => {
                write!(f, "unexpected SPF Delay FSM event")
            }
            Error::ImportError(..) => {
                write!(f, "failed to import snapshot")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PacketDecodeError(error) => Some(error),
            Error::ImportError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Error {
        Error::PacketDecodeError(error)
    }
}

impl From<ImportError> for Error {
    fn from(error: ImportError) -> Error {
        Error::ImportError(error)
    }
}

// ===== impl InterfaceCfgError =====

impl InterfaceCfgError {
    pub(crate) fn log(&self) {
        match self {
            InterfaceCfgError::AreaIdMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::HelloMaskMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::HelloIntervalMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::DeadIntervalMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::DuplicateRouterId(router_id) => {
                warn!(%router_id, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for InterfaceCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceCfgError::AreaIdMismatch(..) => {
                write!(f, "area ID mismatch")
            }
            InterfaceCfgError::HelloMaskMismatch(..) => {
                write!(f, "network mask mismatch")
            }
            InterfaceCfgError::HelloIntervalMismatch(..) => {
                write!(f, "hello interval mismatch")
            }
            InterfaceCfgError::DeadIntervalMismatch(..) => {
                write!(f, "dead interval mismatch")
            }
            InterfaceCfgError::DuplicateRouterId(..) => {
                write!(f, "duplicate router ID")
            }
        }
    }
}

impl std::error::Error for InterfaceCfgError {}

// ===== impl ImportError =====

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(error) => {
                write!(f, "I/O error: {}", error)
            }
            ImportError::Truncated => {
                write!(f, "truncated snapshot file")
            }
            ImportError::InterfaceCountMismatch(received, expected) => {
                write!(
                    f,
                    "interface count mismatch: {} vs {}",
                    received, expected
                )
            }
            ImportError::BadLsa(error) => {
                write!(f, "malformed LSA record: {}", error)
            }
        }
    }
}

impl std::error::Error for ImportError {}

impl From<std::io::Error> for ImportError {
    fn from(error: std::io::Error) -> ImportError {
        ImportError::Io(error)
    }
}
