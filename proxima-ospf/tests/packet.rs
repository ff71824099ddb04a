//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;

use maplit::btreeset;
use proxima_ospf::packet::body::{
    LsaArea, LsaAreaLink, LsaBody, LsaRouter, LsaRouterFlags, LsaRouterLink,
    LsaRouterLinkType, LsaSummary, LsaSummaryPrefix,
};
use proxima_ospf::packet::error::DecodeError;
use proxima_ospf::packet::lsa::{Lsa, LsaHdr, LsaType};
use proxima_ospf::packet::{Hello, LsAck, LsUpdate, Options, Packet, PacketHdr, PacketType};

//
// Helper functions.
//

fn addr(s: &str) -> Ipv4Addr {
    Ipv4Addr::from_str(s).unwrap()
}

fn test_hdr(pkt_type: PacketType) -> PacketHdr {
    PacketHdr {
        pkt_type,
        router_id: addr("1.1.1.1"),
        area_id: addr("0.0.0.0"),
    }
}

fn test_round_trip(packet: &Packet) -> Vec<u8> {
    let bytes = packet.encode();
    let decoded = Packet::decode(&bytes).unwrap();
    assert_eq!(*packet, decoded);
    bytes.to_vec()
}

fn test_router_lsa() -> Lsa {
    Lsa::new(
        0,
        0,
        addr("1.1.1.1"),
        addr("1.1.1.1"),
        0x8000_0001,
        LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::B,
            links: vec![
                LsaRouterLink::new(
                    LsaRouterLinkType::PointToPoint,
                    addr("2.2.2.2"),
                    addr("10.1.1.1"),
                    1,
                ),
                LsaRouterLink::new(
                    LsaRouterLinkType::Stub,
                    addr("10.1.1.0"),
                    addr("255.255.255.0"),
                    1,
                ),
                LsaRouterLink::new(
                    LsaRouterLinkType::AreaProxy,
                    addr("0.0.0.1"),
                    addr("3.3.3.3"),
                    4,
                ),
            ],
        }),
    )
}

//
// Hello packets.
//

#[test]
fn hello_round_trip() {
    let hello = Packet::Hello(Hello {
        hdr: test_hdr(PacketType::Hello),
        network_mask: addr("255.255.255.0"),
        hello_interval: 10,
        options: Options::empty(),
        priority: 0,
        dead_interval: 40,
        neighbors: btreeset![addr("2.2.2.2"), addr("3.3.3.3")],
    });

    let bytes = test_round_trip(&hello);

    // Fixed header layout.
    assert_eq!(bytes[0], 2); // version
    assert_eq!(bytes[1], 1); // type: Hello
    assert_eq!(
        u16::from_be_bytes([bytes[2], bytes[3]]) as usize,
        bytes.len()
    );
    assert_eq!(&bytes[4..8], &[1, 1, 1, 1]); // router-id
    assert_eq!(&bytes[8..12], &[0, 0, 0, 0]); // area-id
    assert_eq!(&bytes[14..16], &[0, 0]); // null auth type
    assert_eq!(&bytes[16..24], &[0; 8]); // null auth data

    // Body: 20 fixed bytes plus two neighbor records.
    assert_eq!(bytes.len(), 24 + 20 + 8);
    assert_eq!(&bytes[24..28], &[255, 255, 255, 0]); // network mask
    assert_eq!(u16::from_be_bytes([bytes[28], bytes[29]]), 10);
    assert_eq!(u32::from_be_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]), 40);
    // Neighbors, sorted.
    assert_eq!(&bytes[44..48], &[2, 2, 2, 2]);
    assert_eq!(&bytes[48..52], &[3, 3, 3, 3]);
}

#[test]
fn hello_bad_checksum() {
    let hello = Packet::Hello(Hello {
        hdr: test_hdr(PacketType::Hello),
        network_mask: addr("255.255.255.0"),
        hello_interval: 10,
        options: Options::empty(),
        priority: 0,
        dead_interval: 40,
        neighbors: btreeset![],
    });

    let mut bytes = hello.encode().to_vec();
    bytes[25] ^= 0xff;
    assert!(matches!(
        Packet::decode(&bytes),
        Err(DecodeError::InvalidChecksum)
    ));
}

#[test]
fn truncated_packet() {
    let hello = Packet::Hello(Hello {
        hdr: test_hdr(PacketType::Hello),
        network_mask: addr("255.255.255.0"),
        hello_interval: 10,
        options: Options::empty(),
        priority: 0,
        dead_interval: 40,
        neighbors: btreeset![],
    });

    let bytes = hello.encode();
    assert!(Packet::decode(&bytes[..10]).is_err());
    assert!(Packet::decode(&[]).is_err());
}

#[test]
fn unknown_version() {
    let hello = Packet::Hello(Hello {
        hdr: test_hdr(PacketType::Hello),
        network_mask: addr("255.255.255.0"),
        hello_interval: 10,
        options: Options::empty(),
        priority: 0,
        dead_interval: 40,
        neighbors: btreeset![],
    });

    let mut bytes = hello.encode().to_vec();
    bytes[0] = 3;
    assert!(matches!(
        Packet::decode(&bytes),
        Err(DecodeError::InvalidVersion(3))
    ));
}

//
// LSAs and LS Update packets.
//

#[test]
fn router_lsa_round_trip() {
    let lsa = test_router_lsa();

    // Header invariants.
    assert_eq!(lsa.hdr.lsa_type, LsaType::Router);
    assert_eq!(lsa.hdr.length as usize, lsa.raw.len());
    assert_eq!(lsa.hdr.length, 20 + 4 + 3 * 12);
    assert!(lsa.validate().is_ok());

    // Wire layout of the first link record.
    assert_eq!(&lsa.raw[0..2], &[0, 0]); // age
    assert_eq!(lsa.raw[2], 0); // options
    assert_eq!(lsa.raw[3], 1); // type code: Router
    assert_eq!(lsa.raw[20], LsaRouterFlags::B.bits());
    assert_eq!(u16::from_be_bytes([lsa.raw[22], lsa.raw[23]]), 3);
    assert_eq!(&lsa.raw[24..28], &[2, 2, 2, 2]); // link-id
    assert_eq!(&lsa.raw[28..32], &[10, 1, 1, 1]); // link-data
    assert_eq!(lsa.raw[32], 1); // link type

    let mut buf = bytes::Bytes::copy_from_slice(&lsa.raw);
    let decoded = Lsa::decode(&mut buf).unwrap();
    assert_eq!(lsa, decoded);
    assert!(decoded.validate().is_ok());
}

#[test]
fn lsa_checksum_covers_body() {
    let lsa = test_router_lsa();

    // Corrupting the body must break the Fletcher checksum.
    let mut corrupted = lsa.raw.to_vec();
    *corrupted.last_mut().unwrap() ^= 0x01;
    let mut buf = bytes::Bytes::copy_from_slice(&corrupted);
    let decoded = Lsa::decode(&mut buf).unwrap();
    assert!(decoded.validate().is_err());

    // The age field is excluded: patching it keeps the checksum valid.
    let mut aged = lsa.raw.to_vec();
    aged[0..2].copy_from_slice(&1234u16.to_be_bytes());
    let mut buf = bytes::Bytes::copy_from_slice(&aged);
    let decoded = Lsa::decode(&mut buf).unwrap();
    assert_eq!(decoded.hdr.age, 1234);
    assert!(decoded.validate().is_ok());
}

#[test]
fn summary_lsa_round_trip() {
    let lsa = Lsa::new(
        0,
        0,
        addr("1.1.1.1"),
        addr("1.1.1.1"),
        0x8000_0005,
        LsaBody::L1Summary(LsaSummary {
            prefixes: vec![
                LsaSummaryPrefix::new(
                    addr("10.1.1.0"),
                    addr("255.255.255.0"),
                    1,
                ),
                LsaSummaryPrefix::new(addr("0.0.0.0"), addr("0.0.0.0"), 0),
            ],
        }),
    );

    assert_eq!(lsa.hdr.lsa_type, LsaType::L1Summary);
    assert_eq!(lsa.raw[3], 12); // type code
    assert_eq!(lsa.hdr.length, 20 + 4 + 2 * 12);

    let mut buf = bytes::Bytes::copy_from_slice(&lsa.raw);
    assert_eq!(Lsa::decode(&mut buf).unwrap(), lsa);
}

#[test]
fn area_lsa_round_trip() {
    let lsa = Lsa::new(
        0,
        0,
        addr("0.0.0.1"),
        addr("0.0.0.1"),
        0x8000_0002,
        LsaBody::Area(LsaArea {
            links: vec![
                LsaAreaLink::new(addr("0.0.0.0"), 1),
                LsaAreaLink::new(addr("0.0.0.2"), 3),
            ],
        }),
    );

    assert_eq!(lsa.hdr.lsa_type, LsaType::Area);
    assert_eq!(lsa.raw[3], 13); // type code
    assert_eq!(lsa.hdr.length, 20 + 4 + 2 * 8);

    let mut buf = bytes::Bytes::copy_from_slice(&lsa.raw);
    assert_eq!(Lsa::decode(&mut buf).unwrap(), lsa);
}

#[test]
fn ls_update_round_trip() {
    let ls_upd = Packet::LsUpdate(LsUpdate {
        hdr: test_hdr(PacketType::LsUpdate),
        lsas: vec![test_router_lsa()],
    });

    let bytes = test_round_trip(&ls_upd);
    assert_eq!(bytes[1], 4); // type: LS Update
    // LSA count.
    assert_eq!(
        u32::from_be_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
        1
    );
}

#[test]
fn ls_ack_round_trip() {
    let lsa = test_router_lsa();
    let ls_ack = Packet::LsAck(LsAck {
        hdr: test_hdr(PacketType::LsAck),
        lsa_hdrs: vec![lsa.hdr],
    });

    let bytes = test_round_trip(&ls_ack);
    assert_eq!(bytes[1], 5); // type: LS Ack
    assert_eq!(bytes.len(), 24 + LsaHdr::LENGTH as usize);
}

#[test]
fn dbdesc_is_rejected() {
    // DbDesc keeps its type code but is never processed.
    let hello = Packet::Hello(Hello {
        hdr: test_hdr(PacketType::Hello),
        network_mask: addr("255.255.255.0"),
        hello_interval: 10,
        options: Options::empty(),
        priority: 0,
        dead_interval: 40,
        neighbors: btreeset![],
    });
    let mut bytes = hello.encode().to_vec();
    bytes[1] = 2;
    // Fix up the checksum so only the type rejection can trigger.
    bytes[12] = 0;
    bytes[13] = 0;
    let mut cksum = internet_checksum::Checksum::new();
    cksum.add_bytes(&bytes[0..16]);
    cksum.add_bytes(&bytes[24..]);
    let cksum = cksum.checksum();
    bytes[12..14].copy_from_slice(&cksum);

    assert!(matches!(
        Packet::decode(&bytes),
        Err(DecodeError::UnknownPacketType(2))
    ));
}
