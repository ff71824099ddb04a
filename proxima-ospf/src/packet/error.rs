//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// Packet decode errors.
#[derive(Debug, Deserialize, Serialize)]
pub enum DecodeError {
    IncompleteMessage,
    InvalidVersion(u8),
    UnknownPacketType(u8),
    InvalidLength(u16),
    InvalidChecksum,
    InvalidRouterId(Ipv4Addr),
    UnknownLsaType(u8),
    InvalidLsaLength,
    UnknownRouterLinkType(u8),
}

// LSA validation errors.
//
// Errors that prevent the LSA from being parsed at all (e.g. invalid LSA
// length) cause the entire LS Update packet to be dropped; validation errors
// discard only the offending LSA.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub enum LsaValidationError {
    InvalidChecksum,
    InvalidLsaAge,
    InvalidLsaSeqNo,
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompleteMessage => {
                write!(f, "incomplete message")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid packet version: {}", version)
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "unknown packet type: {}", pkt_type)
            }
            DecodeError::InvalidLength(pkt_len) => {
                write!(f, "invalid packet length: {}", pkt_len)
            }
            DecodeError::InvalidChecksum => {
                write!(f, "invalid checksum")
            }
            DecodeError::InvalidRouterId(router_id) => {
                write!(f, "invalid router-id: {}", router_id)
            }
            DecodeError::UnknownLsaType(lsa_type) => {
                write!(f, "unknown LSA type: {}", lsa_type)
            }
            DecodeError::InvalidLsaLength => {
                write!(f, "invalid LSA length")
            }
            DecodeError::UnknownRouterLinkType(link_type) => {
                write!(f, "unknown link type: {}", link_type)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::IncompleteMessage
    }
}

// ===== impl LsaValidationError =====

impl std::fmt::Display for LsaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaValidationError::InvalidChecksum => {
                write!(f, "invalid LSA checksum")
            }
            LsaValidationError::InvalidLsaAge => {
                write!(f, "invalid LSA age")
            }
            LsaValidationError::InvalidLsaSeqNo => {
                write!(f, "invalid LSA sequence number")
            }
        }
    }
}

impl std::error::Error for LsaValidationError {}
