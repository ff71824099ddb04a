//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::Ipv4Network;
use num_traits::FromPrimitive;
use proxima_utils::bytes::{BytesExt, BytesMutExt};
use proxima_utils::ip;

use crate::error::{Error, ImportError};
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::Lsa;
use crate::route::{PathType, RouteNet, RouteNetFlags};
use crate::southbound::Southbound;
use crate::spf;

// Snapshot record sizes.
const PREFIX_RECORD_LENGTH: usize = 20;
const NEIGHBOR_RECORD_LENGTH: usize = 13;

// Neighbor record restored from a snapshot.
#[derive(Debug)]
struct NeighborRecord {
    router_id: Ipv4Addr,
    addr: Ipv4Addr,
    state: nsm::State,
    area_id: Ipv4Addr,
}

// ===== metadata =====

// The metadata file carries the leader flag as four big-endian bytes.
pub(crate) fn export_metadata(
    is_leader: bool,
    dir: &Path,
    file_name: &str,
) -> Result<(), Error> {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(is_leader as u32);
    write_file(dir, file_name, &buf)
}

pub(crate) fn import_metadata(
    dir: &Path,
    file_name: &str,
) -> Result<bool, Error> {
    let data = read_file(dir, file_name)?;
    if data.len() < 4 {
        return Err(ImportError::Truncated.into());
    }
    let mut buf = Bytes::copy_from_slice(&data);
    Ok(buf.get_u32() != 0)
}

// ===== prefixes =====

pub(crate) fn export_prefixes(
    rib: &BTreeMap<Ipv4Network, RouteNet>,
    dir: &Path,
    file_name: &str,
) -> Result<(), Error> {
    let mut buf = BytesMut::new();
    buf.put_u32(rib.len() as u32);
    for (prefix, route) in rib {
        buf.put_ipv4(&prefix.ip());
        buf.put_ipv4(&prefix.mask());
        buf.put_opt_ipv4(&route.nexthop);
        buf.put_u32(route.ifindex);
        buf.put_u32(route.metric);
    }
    write_file(dir, file_name, &buf)
}

pub(crate) fn import_prefixes(
    rib_out: &mut BTreeMap<Ipv4Network, RouteNet>,
    dir: &Path,
    file_name: &str,
) -> Result<(), Error> {
    let data = read_file(dir, file_name)?;
    let rib = parse_prefixes(&data)?;
    *rib_out = rib;
    Ok(())
}

fn parse_prefixes(
    data: &[u8],
) -> Result<BTreeMap<Ipv4Network, RouteNet>, ImportError> {
    let mut buf = Bytes::copy_from_slice(data);
    if buf.remaining() < 4 {
        return Err(ImportError::Truncated);
    }
    let count = buf.get_u32() as usize;
    if buf.remaining() < count * PREFIX_RECORD_LENGTH {
        return Err(ImportError::Truncated);
    }

    let mut rib = BTreeMap::new();
    for _ in 0..count {
        let address = buf.get_ipv4();
        let mask = buf.get_ipv4();
        let nexthop = buf.try_get_opt_ipv4().map_err(|_| ImportError::Truncated)?;
        let ifindex = buf.get_u32();
        let metric = buf.get_u32();

        let Some(prefix) = ip::network_from_mask(address, mask) else {
            continue;
        };
        rib.insert(
            prefix,
            RouteNet {
                path_type: PathType::IntraArea,
                metric,
                nexthop,
                ifindex,
                flags: RouteNetFlags::empty(),
            },
        );
    }

    Ok(rib)
}

// ===== neighbors =====

pub(crate) fn export_neighbors(
    arenas: &InstanceArenas,
    dir: &Path,
    file_name: &str,
) -> Result<(), Error> {
    let mut buf = BytesMut::new();
    buf.put_u32(arenas.interfaces.len() as u32);
    for iface in arenas.interfaces.iter() {
        let nbrs = arenas
            .neighbors
            .iter_by_iface(iface.ifindex)
            .collect::<Vec<_>>();
        buf.put_u32(iface.ifindex);
        buf.put_u32(nbrs.len() as u32);
        for nbr in nbrs {
            buf.put_ipv4(&nbr.router_id);
            buf.put_ipv4(&nbr.src);
            buf.put_u8(nbr.state as u8);
            buf.put_ipv4(&nbr.area_id);
        }
    }
    write_file(dir, file_name, &buf)
}

pub(crate) fn import_neighbors<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    dir: &Path,
    file_name: &str,
) -> Result<(), Error>
where
    S: Southbound,
{
    let data = read_file(dir, file_name)?;
    let records = parse_neighbors(&data)?;

    // Records are only applied when they match the bound interfaces.
    if records.len() != arenas.interfaces.len() {
        return Err(ImportError::InterfaceCountMismatch(
            records.len() as u32,
            arenas.interfaces.len() as u32,
        )
        .into());
    }
    for (ifindex, _) in &records {
        if arenas.interfaces.get(*ifindex).is_none() {
            return Err(Error::InterfaceNotFound(*ifindex));
        }
    }

    for (ifindex, nbr_records) in records {
        for record in nbr_records {
            let mut nbr = Neighbor::new(
                record.router_id,
                record.addr,
                record.area_id,
            );
            nbr.state = record.state;
            let nbr = arenas.neighbors.insert(ifindex, nbr);
            if let Some(iface) = arenas.interfaces.get(ifindex) {
                nbr.inactivity_timer_reset(iface, instance);
            }
        }
    }

    Ok(())
}

fn parse_neighbors(
    data: &[u8],
) -> Result<Vec<(u32, Vec<NeighborRecord>)>, ImportError> {
    let mut buf = Bytes::copy_from_slice(data);
    if buf.remaining() < 4 {
        return Err(ImportError::Truncated);
    }
    let iface_count = buf.get_u32() as usize;

    let mut records = vec![];
    for _ in 0..iface_count {
        if buf.remaining() < 8 {
            return Err(ImportError::Truncated);
        }
        let ifindex = buf.get_u32();
        let nbr_count = buf.get_u32() as usize;
        if buf.remaining() < nbr_count * NEIGHBOR_RECORD_LENGTH {
            return Err(ImportError::Truncated);
        }

        let mut nbrs = vec![];
        for _ in 0..nbr_count {
            let router_id = buf.get_ipv4();
            let addr = buf.get_ipv4();
            let state = buf.get_u8();
            let area_id = buf.get_ipv4();
            let state =
                nsm::State::from_u8(state).unwrap_or(nsm::State::Down);
            nbrs.push(NeighborRecord {
                router_id,
                addr,
                state,
                area_id,
            });
        }
        records.push((ifindex, nbrs));
    }

    Ok(records)
}

// ===== lsdb =====

// The LSDB file is the concatenation of the wire encoding of every stored
// LSA, all four kinds interleaved.
pub(crate) fn export_lsdb(
    lsdb: &lsdb::Lsdb,
    dir: &Path,
    file_name: &str,
) -> Result<(), Error> {
    let mut buf = BytesMut::new();
    for (_, lse) in lsdb.iter() {
        buf.put_slice(&lse.data.raw);
    }
    write_file(dir, file_name, &buf)
}

pub(crate) fn import_lsdb<S>(
    instance: &mut InstanceUpView<'_, S>,
    arenas: &mut InstanceArenas,
    dir: &Path,
    file_name: &str,
) -> Result<(), Error>
where
    S: Southbound,
{
    let data = read_file(dir, file_name)?;

    // The whole file is parsed before anything is installed, so a
    // truncated snapshot leaves the database untouched.
    let lsas = parse_lsdb(&data)?;
    for lsa in lsas {
        lsdb::install(instance, arenas, lsa);
    }
    spf::schedule(instance);

    Ok(())
}

fn parse_lsdb(data: &[u8]) -> Result<Vec<Lsa>, ImportError> {
    let mut buf = Bytes::copy_from_slice(data);
    let mut lsas = vec![];
    while buf.has_remaining() {
        let lsa = Lsa::decode(&mut buf).map_err(ImportError::BadLsa)?;
        lsas.push(lsa);
    }
    Ok(lsas)
}

// ===== helper functions =====

fn read_file(dir: &Path, file_name: &str) -> Result<Vec<u8>, ImportError> {
    std::fs::read(dir.join(file_name)).map_err(ImportError::Io)
}

fn write_file(
    dir: &Path,
    file_name: &str,
    data: &[u8],
) -> Result<(), Error> {
    std::fs::create_dir_all(dir).map_err(ImportError::Io)?;
    std::fs::write(dir.join(file_name), data).map_err(ImportError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_truncated_count() {
        // routeNum = 1, but no route entries.
        assert!(matches!(
            parse_prefixes(&[0, 0, 0, 1]),
            Err(ImportError::Truncated)
        ));
    }

    #[test]
    fn prefixes_empty_is_error() {
        assert!(matches!(
            parse_prefixes(&[]),
            Err(ImportError::Truncated)
        ));
    }

    #[test]
    fn prefixes_round_trip() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_ipv4(&Ipv4Addr::new(10, 1, 1, 0));
        buf.put_ipv4(&Ipv4Addr::new(255, 255, 255, 0));
        buf.put_ipv4(&Ipv4Addr::new(10, 1, 1, 2));
        buf.put_u32(1);
        buf.put_u32(3);

        let rib = parse_prefixes(&buf).unwrap();
        assert_eq!(rib.len(), 1);
        let (prefix, route) = rib.iter().next().unwrap();
        assert_eq!(prefix.ip(), Ipv4Addr::new(10, 1, 1, 0));
        assert_eq!(prefix.prefix(), 24);
        assert_eq!(route.nexthop, Some(Ipv4Addr::new(10, 1, 1, 2)));
        assert_eq!(route.ifindex, 1);
        assert_eq!(route.metric, 3);
    }

    #[test]
    fn neighbors_truncated() {
        // One interface announced, no interface record.
        assert!(matches!(
            parse_neighbors(&[0, 0, 0, 1]),
            Err(ImportError::Truncated)
        ));
    }

    #[test]
    fn lsdb_truncated() {
        assert!(matches!(
            parse_lsdb(&[0x01]),
            Err(ImportError::BadLsa(_))
        ));
    }

    #[test]
    fn lsdb_empty_is_noop() {
        assert!(parse_lsdb(&[]).unwrap().is_empty());
    }
}
