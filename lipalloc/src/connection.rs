// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The slice of a dataplane connection the allocator touches.
//!
//! The connection table itself, its tuple hashing and its lookup are out of
//! scope; this crate only needs the fields `bind`/`unbind` read and write.

use std::net::IpAddr;

use concurrency::sync::Arc;

use crate::addr::LocalAddress;

/// Transport protocol of a connection. Only TCP and UDP are allocation-eligible;
/// anything else is rejected by `bind` with [`crate::status::Status::NotSupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    Tcp,
    Udp,
    Other,
}

/// The fields of a connection the allocator reads and writes. Owned by the
/// packet pipeline; `bind`/`unbind` are given `&mut` access to one of these.
#[derive(Debug)]
pub struct Connection {
    proto: Proto,
    is_template: bool,
    daddr: IpAddr,
    dport: u16,
    laddr: Option<IpAddr>,
    lport: Option<u16>,
    local: Option<Arc<LocalAddress>>,
}

impl Connection {
    #[must_use]
    pub fn new(proto: Proto, daddr: IpAddr, dport: u16) -> Self {
        Self {
            proto,
            is_template: false,
            daddr,
            dport,
            laddr: None,
            lport: None,
            local: None,
        }
    }

    #[must_use]
    pub fn template(proto: Proto, daddr: IpAddr, dport: u16) -> Self {
        Self {
            is_template: true,
            ..Self::new(proto, daddr, dport)
        }
    }

    #[must_use]
    pub fn proto(&self) -> Proto {
        self.proto
    }

    #[must_use]
    pub fn is_template(&self) -> bool {
        self.is_template
    }

    #[must_use]
    pub fn destination(&self) -> (IpAddr, u16) {
        (self.daddr, self.dport)
    }

    #[must_use]
    pub fn local_endpoint(&self) -> Option<(IpAddr, u16)> {
        Some((self.laddr?, self.lport?))
    }

    #[must_use]
    pub fn local(&self) -> Option<&Arc<LocalAddress>> {
        self.local.as_ref()
    }

    pub(crate) fn set_bound(&mut self, laddr: IpAddr, lport: u16, local: Arc<LocalAddress>) {
        self.laddr = Some(laddr);
        self.lport = Some(lport);
        self.local = Some(local);
    }

    pub(crate) fn take_local(&mut self) -> Option<Arc<LocalAddress>> {
        self.laddr = None;
        self.lport = None;
        self.local.take()
    }
}
