// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The [`LocalAddress`] entry: the per-address record held in a [`crate::pool::ServiceLocalPool`].

use std::net::{Ipv4Addr, Ipv6Addr};

use concurrency::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::iface::InterfaceIndex;

/// Address family of a [`LocalAddress`], mirroring the two families the allocator
/// cares about. Nothing below this layer is dual-stack: a pool entry, a bind
/// attempt and an SA-pool fetch always agree on one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A local (balancer-owned) IP address, either v4 or v6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalAddr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl LocalAddr {
    /// The address family of this value.
    #[must_use]
    pub fn family(self) -> AddressFamily {
        match self {
            LocalAddr::V4(_) => AddressFamily::V4,
            LocalAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// The per-address record owned by a [`crate::pool::ServiceLocalPool`].
///
/// `refcnt` is a deferred-free guard, not a shared-ownership primitive: it only
/// blocks `laddr_del`/`laddr_flush`, it does not keep the entry reachable on its
/// own. `conn_counts` is purely observable, reported to operators via
/// `laddr_getall`, and plays no role in the delete/flush gate.
#[derive(Debug)]
pub struct LocalAddress {
    addr: LocalAddr,
    iface: InterfaceIndex,
    refcnt: AtomicU32,
    conn_counts: AtomicU32,
    /// Set by the reload reconciler when this entry is a fresh record standing in
    /// for a surviving address from the previous configuration generation.
    reloaded: AtomicBool,
}

impl LocalAddress {
    /// Construct a fresh entry with both counters at zero.
    #[must_use]
    pub fn new(addr: LocalAddr, iface: InterfaceIndex) -> Self {
        Self {
            addr,
            iface,
            refcnt: AtomicU32::new(0),
            conn_counts: AtomicU32::new(0),
            reloaded: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn addr(&self) -> LocalAddr {
        self.addr
    }

    #[must_use]
    pub fn family(&self) -> AddressFamily {
        self.addr.family()
    }

    #[must_use]
    pub fn iface(&self) -> InterfaceIndex {
        self.iface
    }

    /// Current reference count. Never negative by construction (unsigned).
    #[must_use]
    pub fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    /// Current count of bound live connections using this address.
    #[must_use]
    pub fn conn_counts(&self) -> u32 {
        self.conn_counts.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_reloaded(&self) -> bool {
        self.reloaded.load(Ordering::Acquire)
    }

    pub fn mark_reloaded(&self) {
        self.reloaded.store(true, Ordering::Release);
    }

    /// `(family, addr)` equality used by duplicate checks and deletes/lookups.
    #[must_use]
    pub fn matches(&self, family: AddressFamily, addr: LocalAddr) -> bool {
        self.addr.family() == family && self.addr == addr
    }

    /// Take a reference. Called at the start of every `bind` trial.
    pub(crate) fn hold(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }

    /// Release a reference taken by [`LocalAddress::hold`] without having reached
    /// a bound connection (a failed trial in `bind`, or `unbind`'s own decrement).
    pub(crate) fn release(&self) {
        let prev = self.refcnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "refcnt underflow on LocalAddress::release");
    }

    pub(crate) fn conn_opened(&self) {
        self.conn_counts.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn conn_closed(&self) {
        let prev = self.conn_counts.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "conn_counts underflow on LocalAddress::conn_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_has_zero_counters() {
        let entry = LocalAddress::new(LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), InterfaceIndex::new(1));
        assert_eq!(entry.refcnt(), 0);
        assert_eq!(entry.conn_counts(), 0);
        assert!(!entry.is_reloaded());
    }

    #[test]
    fn hold_and_release_round_trip() {
        let entry = LocalAddress::new(LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), InterfaceIndex::new(1));
        entry.hold();
        assert_eq!(entry.refcnt(), 1);
        entry.conn_opened();
        assert_eq!(entry.conn_counts(), 1);
        entry.conn_closed();
        entry.release();
        assert_eq!(entry.refcnt(), 0);
        assert_eq!(entry.conn_counts(), 0);
    }

    #[test]
    fn matches_is_family_and_value_sensitive() {
        let entry = LocalAddress::new(LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), InterfaceIndex::new(1));
        assert!(entry.matches(AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(!entry.matches(AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        assert!(!entry.matches(AddressFamily::V6, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }
}
