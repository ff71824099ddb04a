//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod body;
pub mod error;
pub mod lsa;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use proxima_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use proxima_utils::ip::Ipv4AddrExt;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::{Lsa, LsaHdr};

// Packet type codes.
//
// DbDesc and LsRequest keep their stock code points but are never generated:
// point-to-point adjacencies synchronize through flooding and
// retransmission alone.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum PacketType {
    Hello = 1,
    DbDesc = 2,
    LsRequest = 3,
    LsUpdate = 4,
    LsAck = 5,
}

// Packet options field.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Options: u8 {
        const E = 0x02;
    }
}

//
// Packet header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Version #   |     Type      |         Packet length         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Router ID                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                           Area ID                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Checksum            |             AuType            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// Authentication is a non-goal; AuType and the authentication data are
// always zero on the wire and rejected otherwise.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
}

//
// Hello packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Network Mask                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         HelloInterval         |    Options    |    Rtr Pri    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     RouterDeadInterval                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Designated Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                   Backup Designated Router                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Neighbor                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
// DR/BDR election does not apply to point-to-point adjacencies; both fields
// are zero on the wire.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hello {
    pub hdr: PacketHdr,
    pub network_mask: Ipv4Addr,
    pub hello_interval: u16,
    pub options: Options,
    pub priority: u8,
    pub dead_interval: u32,
    pub neighbors: BTreeSet<Ipv4Addr>,
}

//
// Link State Update packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                            # LSAs                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +-                                                            +-+
// |                             LSAs                              |
// +-                                                            +-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsUpdate {
    pub hdr: PacketHdr,
    pub lsas: Vec<Lsa>,
}

//
// Link State Acknowledgment packet.
//
// Encoding format (packet body): list of LSA headers.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsAck {
    pub hdr: PacketHdr,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// Decoded packet.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Packet {
    Hello(Hello),
    LsUpdate(LsUpdate),
    LsAck(LsAck),
}

// ===== impl PacketHdr =====

impl PacketHdr {
    pub const VERSION: u8 = 2;
    pub const LENGTH: u16 = 24;
    pub const CKSUM_RANGE: std::ops::Range<usize> = 12..14;
    pub const AUTH_RANGE: std::ops::Range<usize> = 16..24;

    fn decode(buf: &mut Bytes) -> DecodeResult<(Self, u16)> {
        // Parse version.
        let version = buf.try_get_u8()?;
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }

        // Parse packet type.
        let pkt_type = buf.try_get_u8()?;
        let Some(pkt_type) = PacketType::from_u8(pkt_type) else {
            return Err(DecodeError::UnknownPacketType(pkt_type));
        };

        // Parse and validate message length.
        let pkt_len = buf.try_get_u16()?;
        let min_pkt_len = Self::LENGTH
            + match pkt_type {
                PacketType::Hello => Hello::BASE_LENGTH,
                PacketType::LsUpdate => LsUpdate::BASE_LENGTH,
                PacketType::DbDesc
                | PacketType::LsRequest
                | PacketType::LsAck => 0,
            };
        if pkt_len < min_pkt_len {
            return Err(DecodeError::InvalidLength(pkt_len));
        }

        // Parse Router-ID.
        let router_id = buf.try_get_ipv4()?;
        if !router_id.is_usable() {
            return Err(DecodeError::InvalidRouterId(router_id));
        }

        // Parse Area ID.
        let area_id = buf.try_get_ipv4()?;

        // Parse checksum (verified separately over the full packet).
        let _cksum = buf.try_get_u16()?;

        // Parse authentication fields (always null).
        let _au_type = buf.try_get_u16()?;
        let _au_data = buf.try_get_u64()?;

        Ok((
            PacketHdr {
                pkt_type,
                router_id,
                area_id,
            },
            pkt_len,
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(Self::VERSION);
        buf.put_u8(self.pkt_type as u8);
        // The length will be initialized later.
        buf.put_u16(0);
        buf.put_ipv4(&self.router_id);
        buf.put_ipv4(&self.area_id);
        // The checksum will be computed later.
        buf.put_u16(0);
        // Null authentication.
        buf.put_u16(0);
        buf.put_u64(0);
    }

    fn update_cksum(buf: &mut BytesMut) {
        let mut cksum = Checksum::new();
        cksum.add_bytes(&buf[0..Self::AUTH_RANGE.start]);
        cksum.add_bytes(&buf[Self::AUTH_RANGE.end..]);
        let cksum = cksum.checksum();
        buf[Self::CKSUM_RANGE].copy_from_slice(&cksum);
    }

    fn verify_cksum(data: &[u8]) -> DecodeResult<()> {
        let mut cksum = Checksum::new();
        cksum.add_bytes(&data[0..Self::AUTH_RANGE.start]);
        cksum.add_bytes(&data[Self::AUTH_RANGE.end..]);
        if cksum.checksum() != [0; 2] {
            return Err(DecodeError::InvalidChecksum);
        }

        Ok(())
    }
}

// ===== impl Hello =====

impl Hello {
    pub const BASE_LENGTH: u16 = 20;

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let network_mask = buf.try_get_ipv4()?;
        let hello_interval = buf.try_get_u16()?;
        let options = Options::from_bits_truncate(buf.try_get_u8()?);
        let priority = buf.try_get_u8()?;
        let dead_interval = buf.try_get_u32()?;
        let _dr = buf.try_get_opt_ipv4()?;
        let _bdr = buf.try_get_opt_ipv4()?;

        // Parse list of neighbors.
        let mut neighbors = BTreeSet::new();
        let nbrs_cnt = buf.remaining() / 4;
        for _ in 0..nbrs_cnt {
            let nbr = buf.try_get_ipv4()?;
            neighbors.insert(nbr);
        }

        Ok(Hello {
            hdr,
            network_mask,
            hello_interval,
            options,
            priority,
            dead_interval,
            neighbors,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.network_mask);
        buf.put_u16(self.hello_interval);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.priority);
        buf.put_u32(self.dead_interval);
        // DR/BDR are not elected on point-to-point links.
        buf.put_opt_ipv4(&None);
        buf.put_opt_ipv4(&None);
        for nbr in &self.neighbors {
            buf.put_ipv4(nbr);
        }
    }
}

// ===== impl LsUpdate =====

impl LsUpdate {
    pub const BASE_LENGTH: u16 = 4;

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        // Parse list of LSAs.
        let mut lsas = vec![];
        let lsas_cnt = buf.try_get_u32()?;
        for _ in 0..lsas_cnt {
            let lsa = Lsa::decode(buf)?;
            lsas.push(lsa);
        }

        Ok(LsUpdate { hdr, lsas })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.lsas.len() as u32);
        for lsa in &self.lsas {
            buf.put_slice(&lsa.raw);
        }
    }
}

// ===== impl LsAck =====

impl LsAck {
    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        // Parse list of LSA headers.
        let mut lsa_hdrs = vec![];
        let lsa_hdrs_cnt = buf.remaining() / LsaHdr::LENGTH as usize;
        for _ in 0..lsa_hdrs_cnt {
            let lsa_hdr = LsaHdr::decode(buf)?;
            lsa_hdrs.push(lsa_hdr);
        }

        Ok(LsAck { hdr, lsa_hdrs })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        for lsa_hdr in &self.lsa_hdrs {
            lsa_hdr.encode(buf);
        }
    }
}

// ===== impl Packet =====

impl Packet {
    pub fn hdr(&self) -> &PacketHdr {
        match self {
            Packet::Hello(pkt) => &pkt.hdr,
            Packet::LsUpdate(pkt) => &pkt.hdr,
            Packet::LsAck(pkt) => &pkt.hdr,
        }
    }

    // Encodes the packet, computing the length and checksum fields.
    pub fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr().encode(&mut buf);
            match self {
                Packet::Hello(pkt) => pkt.encode_body(&mut buf),
                Packet::LsUpdate(pkt) => pkt.encode_body(&mut buf),
                Packet::LsAck(pkt) => pkt.encode_body(&mut buf),
            }

            // Rewrite packet length.
            let pkt_len = buf.len() as u16;
            buf[2..4].copy_from_slice(&pkt_len.to_be_bytes());

            // Compute packet checksum.
            PacketHdr::update_cksum(&mut buf);

            buf.clone().freeze()
        })
    }

    // Decodes a packet from the provided byte slice.
    pub fn decode(data: &[u8]) -> DecodeResult<Packet> {
        let mut buf = Bytes::copy_from_slice(data);

        // Decode and validate the packet header.
        if buf.remaining() < PacketHdr::LENGTH as usize {
            return Err(DecodeError::IncompleteMessage);
        }
        let (hdr, pkt_len) = PacketHdr::decode(&mut buf)?;
        if (pkt_len as usize) > data.len() {
            return Err(DecodeError::InvalidLength(pkt_len));
        }

        // Validate the packet checksum before parsing the body.
        PacketHdr::verify_cksum(&data[0..pkt_len as usize])?;

        // Decode the packet body.
        let body_len = pkt_len - PacketHdr::LENGTH;
        let mut buf = buf.copy_to_bytes(body_len as usize);
        let packet = match hdr.pkt_type {
            PacketType::Hello => {
                Packet::Hello(Hello::decode(hdr, &mut buf)?)
            }
            PacketType::LsUpdate => {
                Packet::LsUpdate(LsUpdate::decode(hdr, &mut buf)?)
            }
            PacketType::LsAck => Packet::LsAck(LsAck::decode(hdr, &mut buf)?),
            PacketType::DbDesc | PacketType::LsRequest => {
                // Database exchange happens through flooding on
                // point-to-point adjacencies.
                return Err(DecodeError::UnknownPacketType(
                    hdr.pkt_type as u8,
                ));
            }
        };

        Ok(packet)
    }
}
