//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use proxima_utils::bytes::{BytesExt, BytesMutExt};
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::LsaType;

// LSA body.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    L1Summary(LsaSummary),
    Area(LsaArea),
    L2Summary(LsaSummary),
}

//
// Router-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Flags     |       0       |            # links            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Link ID                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Link Data                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Type      |       0       |            Metric             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub links: Vec<LsaRouterLink>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        // Border router: has at least one cross-area adjacency.
        const B = 0x01;
    }
}

// Router-LSA link types.
//
// PointToPoint and Stub carry the stock OSPFv2 semantics. AreaProxy encodes
// a cross-area adjacency: link-id is the peer area, link-data the remote
// router-id.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 1,
    Stub = 3,
    AreaProxy = 4,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

//
// L1-Summary-LSA and L2-Summary-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          # prefixes                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                           Address                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Network Mask                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                            Metric                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummary {
    pub prefixes: Vec<LsaSummaryPrefix>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummaryPrefix {
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub metric: u32,
}

//
// Area-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         # area links                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Peer Area ID                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                            Metric                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaArea {
    pub links: Vec<LsaAreaLink>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaAreaLink {
    pub peer_area: Ipv4Addr,
    pub metric: u32,
}

// ===== impl LsaBody =====

impl LsaBody {
    pub fn lsa_type(&self) -> LsaType {
        match self {
            LsaBody::Router(_) => LsaType::Router,
            LsaBody::L1Summary(_) => LsaType::L1Summary,
            LsaBody::Area(_) => LsaType::Area,
            LsaBody::L2Summary(_) => LsaType::L2Summary,
        }
    }

    pub(crate) fn decode(
        lsa_type: LsaType,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        let body = match lsa_type {
            LsaType::Router => LsaBody::Router(LsaRouter::decode(buf)?),
            LsaType::L1Summary => {
                LsaBody::L1Summary(LsaSummary::decode(buf)?)
            }
            LsaType::Area => LsaBody::Area(LsaArea::decode(buf)?),
            LsaType::L2Summary => {
                LsaBody::L2Summary(LsaSummary::decode(buf)?)
            }
        };

        Ok(body)
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(lsa) => lsa.encode(buf),
            LsaBody::L1Summary(lsa) | LsaBody::L2Summary(lsa) => {
                lsa.encode(buf)
            }
            LsaBody::Area(lsa) => lsa.encode(buf),
        }
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    pub const BASE_LENGTH: u16 = 4;
    pub const LINK_LENGTH: u16 = 12;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // Validate minimum LSA length.
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        let flags = LsaRouterFlags::from_bits_truncate(buf.get_u8());
        let _ = buf.get_u8();
        let links_cnt = buf.get_u16();

        let mut links = vec![];
        for _ in 0..links_cnt {
            let link_id = buf.try_get_ipv4()?;
            let link_data = buf.try_get_ipv4()?;
            let link_type = buf.try_get_u8()?;
            let link_type = LsaRouterLinkType::from_u8(link_type)
                .ok_or(DecodeError::UnknownRouterLinkType(link_type))?;
            let _ = buf.try_get_u8()?;
            let metric = buf.try_get_u16()?;

            let link =
                LsaRouterLink::new(link_type, link_id, link_data, metric);
            links.push(link);
        }

        Ok(LsaRouter { flags, links })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u16(self.links.len() as u16);
        for link in &self.links {
            buf.put_ipv4(&link.link_id);
            buf.put_ipv4(&link.link_data);
            buf.put_u8(link.link_type as u8);
            buf.put_u8(0);
            buf.put_u16(link.metric);
        }
    }
}

// ===== impl LsaSummary =====

impl LsaSummary {
    pub const BASE_LENGTH: u16 = 4;
    pub const PREFIX_LENGTH: u16 = 12;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // Validate minimum LSA length.
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        let prefixes_cnt = buf.get_u32();

        let mut prefixes = vec![];
        for _ in 0..prefixes_cnt {
            let address = buf.try_get_ipv4()?;
            let mask = buf.try_get_ipv4()?;
            let metric = buf.try_get_u32()?;
            prefixes.push(LsaSummaryPrefix::new(address, mask, metric));
        }

        Ok(LsaSummary { prefixes })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.prefixes.len() as u32);
        for prefix in &self.prefixes {
            buf.put_ipv4(&prefix.address);
            buf.put_ipv4(&prefix.mask);
            buf.put_u32(prefix.metric);
        }
    }
}

// ===== impl LsaArea =====

impl LsaArea {
    pub const BASE_LENGTH: u16 = 4;
    pub const LINK_LENGTH: u16 = 8;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // Validate minimum LSA length.
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        let links_cnt = buf.get_u32();

        let mut links = vec![];
        for _ in 0..links_cnt {
            let peer_area = buf.try_get_ipv4()?;
            let metric = buf.try_get_u32()?;
            links.push(LsaAreaLink::new(peer_area, metric));
        }

        Ok(LsaArea { links })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.links.len() as u32);
        for link in &self.links {
            buf.put_ipv4(&link.peer_area);
            buf.put_u32(link.metric);
        }
    }
}
