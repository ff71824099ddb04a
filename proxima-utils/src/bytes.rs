//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};

thread_local!(
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(65536))
);

// Extension methods for Bytes.
pub trait BytesExt {
    /// Gets an IPv4 address from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    ///
    /// # Panics
    ///
    /// This function panics if there is no more remaining data in `self`.
    fn get_ipv4(&mut self) -> Ipv4Addr;

    /// Gets an IPv4 address from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    ///
    /// Returns `Err(TryGetError)` when there are not enough remaining bytes to
    /// read the value.
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError>;

    /// Gets an optional IPv4 address from `self` in big-endian byte order,
    /// mapping the unspecified address to `None`.
    ///
    /// The current position is advanced by 4.
    fn try_get_opt_ipv4(&mut self) -> Result<Option<Ipv4Addr>, TryGetError>;
}

// Extension methods for BytesMut.
pub trait BytesMutExt {
    /// Writes an IPv4 address to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    ///
    /// # Panics
    ///
    /// This function panics if there is not enough remaining capacity in
    /// `self`.
    fn put_ipv4(&mut self, addr: &Ipv4Addr);

    /// Writes an optional IPv4 address to `self` in big-endian byte order,
    /// mapping `None` to the unspecified address.
    ///
    /// The current position is advanced by 4.
    fn put_opt_ipv4(&mut self, addr: &Option<Ipv4Addr>);
}

// ===== impl Bytes =====

impl BytesExt for Bytes {
    fn get_ipv4(&mut self) -> Ipv4Addr {
        self.try_get_ipv4().unwrap()
    }

    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError> {
        let bytes = self.try_get_u32()?;
        Ok(Ipv4Addr::from(bytes))
    }

    fn try_get_opt_ipv4(&mut self) -> Result<Option<Ipv4Addr>, TryGetError> {
        let bytes = self.try_get_u32()?;
        let addr = Ipv4Addr::from(bytes);
        Ok((!addr.is_unspecified()).then_some(addr))
    }
}

// ===== impl BytesMut =====

impl BytesMutExt for BytesMut {
    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_u32((*addr).into())
    }

    fn put_opt_ipv4(&mut self, addr: &Option<Ipv4Addr>) {
        self.put_u32(addr.map(Into::into).unwrap_or(0))
    }
}
