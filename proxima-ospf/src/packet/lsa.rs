//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use proxima_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use serde::{Deserialize, Serialize};

use crate::lsdb::{LSA_MAX_AGE, LSA_RESERVED_SEQ_NO};
use crate::packet::body::LsaBody;
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};

// LSA type codes.
//
// Router is the stock OSPFv2 code; the three area-proxy types occupy slots
// unclaimed by stock OSPFv2 and its deployed extensions. The assignments are
// stable within a routing domain.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum LsaType {
    Router = 1,
    L1Summary = 12,
    Area = 13,
    L2Summary = 14,
}

// LSA flooding scope.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaScope {
    // Flooded to adjacencies within the originating area only.
    Area,
    // Flooded to every adjacency, including cross-area ones.
    Domain,
}

// LSA key. It serves both as a global LSA identifier and as a key to store
// LSAs in an LSDB.
//
// Please be aware that modifying the order of the fields will impact
// operations such as iterating over LSDBs.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    // LSA type.
    pub lsa_type: LsaType,
    // LSA advertising router.
    pub adv_rtr: Ipv4Addr,
    // LSA ID.
    pub lsa_id: Ipv4Addr,
}

//
// LSA header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            LS age             |    Options    |    LS type    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Link State ID                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Advertising Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     LS sequence number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         LS checksum           |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub options: u8,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// Full LSA: raw bytes plus the decoded header and body.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    // LSA raw bytes.
    pub raw: Bytes,
    // LSA header.
    pub hdr: LsaHdr,
    // LSA body.
    pub body: LsaBody,
    // Time the LSA was created or received. When combined with the Age field
    // in the LSA header, the actual LSA age can be determined.
    #[serde(skip)]
    pub base_time: Option<Instant>,
}

// ===== impl LsaType =====

impl LsaType {
    // Return the flooding scope associated to the LSA type.
    pub fn scope(&self) -> LsaScope {
        match self {
            LsaType::Router | LsaType::L1Summary => LsaScope::Area,
            LsaType::Area | LsaType::L2Summary => LsaScope::Domain,
        }
    }
}

impl From<LsaType> for u8 {
    fn from(lsa_type: LsaType) -> u8 {
        lsa_type as u8
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let age = buf.try_get_u16()?;
        let options = buf.try_get_u8()?;
        let lsa_type = buf.try_get_u8()?;
        let Some(lsa_type) = LsaType::from_u8(lsa_type) else {
            return Err(DecodeError::UnknownLsaType(lsa_type));
        };
        let lsa_id = buf.try_get_ipv4()?;
        let adv_rtr = buf.try_get_ipv4()?;
        let seq_no = buf.try_get_u32()?;
        let cksum = buf.try_get_u16()?;
        let length = buf.try_get_u16()?;

        Ok(LsaHdr {
            age,
            options,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum,
            length,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options);
        buf.put_u8(self.lsa_type.into());
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    pub fn key(&self) -> LsaKey {
        LsaKey {
            lsa_type: self.lsa_type,
            adv_rtr: self.adv_rtr,
            lsa_id: self.lsa_id,
        }
    }

    pub fn is_maxage(&self) -> bool {
        self.age == LSA_MAX_AGE
    }
}

// ===== impl Lsa =====

impl Lsa {
    // LSA maximum length.
    //
    // Opt for a conservative value to avoid fragmentation even in low-MTU
    // links.
    pub const MAX_LENGTH: usize = 1024;

    pub fn new(
        age: u16,
        options: u8,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Self {
        // Build LSA header (the length and checksum are computed later).
        let hdr = LsaHdr {
            age,
            options,
            lsa_type: body.lsa_type(),
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: 0,
        };

        // Build full LSA and encode it.
        let mut lsa = Lsa {
            raw: Default::default(),
            hdr,
            body,
            base_time: None,
        };
        lsa.encode();
        lsa
    }

    // Returns the current LSA age.
    pub(crate) fn age(&self, now: Instant) -> u16 {
        match self.base_time {
            Some(base_time) => {
                let elapsed =
                    u16::try_from(now.saturating_duration_since(base_time).as_secs())
                        .unwrap_or(u16::MAX);
                std::cmp::min(self.hdr.age.saturating_add(elapsed), LSA_MAX_AGE)
            }
            None => self.hdr.age,
        }
    }

    // Updates the LSA age in both the header and the raw data.
    //
    // Callers keeping the LSA stored must re-stamp `base_time` so aging
    // continues from the new value.
    pub(crate) fn set_age(&mut self, age: u16) {
        // Update header.
        self.hdr.age = age;

        // Update raw data. The age field is excluded from the checksum, so
        // patching it in place is safe.
        let mut raw = BytesMut::from(self.raw.as_ref());
        raw[0..2].copy_from_slice(&age.to_be_bytes());
        self.raw = raw.freeze();
    }

    // Sets the LSA age to MaxAge.
    pub(crate) fn set_maxage(&mut self) {
        self.set_age(LSA_MAX_AGE);
    }

    // Decodes LSA from a bytes buffer.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // Decode LSA header.
        let buf_orig = buf.clone();
        if buf.remaining() < LsaHdr::LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }
        let hdr = LsaHdr::decode(buf)?;
        let lsa_len = hdr.length;
        if lsa_len < LsaHdr::LENGTH || lsa_len as usize > Lsa::MAX_LENGTH {
            return Err(DecodeError::InvalidLsaLength);
        }
        let lsa_body_len = lsa_len - LsaHdr::LENGTH;

        // Decode LSA body.
        if buf.remaining() < lsa_body_len as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        let mut buf_lsa = buf.copy_to_bytes(lsa_body_len as usize);
        let body = LsaBody::decode(hdr.lsa_type, &mut buf_lsa)?;

        Ok(Lsa {
            raw: buf_orig.slice(0..lsa_len as usize),
            hdr,
            body,
            base_time: None,
        })
    }

    // Encodes LSA into a bytes buffer.
    pub(crate) fn encode(&mut self) {
        // Encode LSA in network byte order.
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr.encode(&mut buf);
            self.body.encode(&mut buf);

            // Rewrite LSA length.
            let lsa_len = buf.len() as u16;
            buf[18..20].copy_from_slice(&lsa_len.to_be_bytes());
            self.hdr.length = lsa_len;

            // Compute LSA checksum (the age field is excluded).
            let cksum = Self::checksum(&buf[2..(lsa_len as usize)]);
            buf[16..18].copy_from_slice(&cksum);
            self.hdr.cksum = u16::from_be_bytes(cksum);

            // Store LSA raw data.
            self.raw = buf.clone().freeze();
        });
    }

    pub fn validate(&self) -> Result<(), LsaValidationError> {
        if self.hdr.age > LSA_MAX_AGE {
            return Err(LsaValidationError::InvalidLsaAge);
        }
        if self.hdr.seq_no == LSA_RESERVED_SEQ_NO {
            return Err(LsaValidationError::InvalidLsaSeqNo);
        }
        if !self.is_checksum_valid() {
            return Err(LsaValidationError::InvalidChecksum);
        }

        Ok(())
    }

    // RFC 2328 Fletcher-16 checksum with the X/Y placement adjustment.
    fn checksum(data: &[u8]) -> [u8; 2] {
        let checksum = fletcher::calc_fletcher16(data);
        let mut checkbyte0 = (checksum & 0x00ff) as i32;
        let mut checkbyte1 = ((checksum >> 8) & 0x00ff) as i32;

        // Adjust checksum value using the checksum field offset.
        let sop = data.len() as u16 - 15;
        let mut x = (sop as i32 * checkbyte0 - checkbyte1) % 255;
        if x <= 0 {
            x += 255;
        }
        checkbyte1 = 510 - checkbyte0 - x;
        if checkbyte1 > 255 {
            checkbyte1 -= 255;
        }
        checkbyte0 = x;
        [checkbyte0 as u8, checkbyte1 as u8]
    }

    // Checks if the checksum is valid.
    fn is_checksum_valid(&self) -> bool {
        // Skip the Age field.
        fletcher::calc_fletcher16(&self.raw[2..(self.hdr.length as usize)]) == 0
    }
}
