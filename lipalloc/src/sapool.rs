// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Facade over the socket-address pool (SA-pool).
//!
//! The SA-pool owns the ephemeral port space per `(iface, lip, core)` and programs
//! the hardware flow-director so that reply traffic lands back on the originating
//! core. None of that is this crate's concern: the allocator only ever calls
//! [`SaPool::fetch`] and [`SaPool::release`], and consults
//! [`SaPool::sub_pool_configured`] in addr-mode to skip addresses that this core
//! has no sub-pool under. Implementing the SA-pool itself is explicitly out of
//! scope here; production callers supply their own implementation, tests supply
//! a fake.

use std::net::IpAddr;

use crate::addr::{AddressFamily, LocalAddr};
use crate::iface::InterfaceIndex;
use crate::pool::CoreId;

/// Destination endpoint a connection is being bound towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestEndpoint {
    pub addr: IpAddr,
    pub port: u16,
}

/// Source endpoint under construction. The allocator fills `addr` before calling
/// [`SaPool::fetch`]; the SA-pool fills `port` in place on success. `port` is
/// `None` going in and `Some` coming out of a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SrcEndpoint {
    pub addr: LocalAddr,
    pub port: Option<u16>,
}

impl SrcEndpoint {
    #[must_use]
    pub fn unbound(addr: LocalAddr) -> Self {
        Self { addr, port: None }
    }
}

/// The SA-pool could not produce a source port for this `(iface, lip, dst)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("SA-pool exhausted for this address")]
pub struct Exhausted;

/// Boundary the allocator consumes to reserve and return `(lip, lport)` pairs.
///
/// Opaque from the allocator's perspective: implementations are free to back this
/// with a port bitmap, a hash ring, or anything else, as long as `fetch`/`release`
/// are paired correctly by the caller (which this crate's `bind`/`unbind` do).
pub trait SaPool: Send + Sync {
    /// Reserve a source port for `dst` under `src.addr`, on `iface`. On success,
    /// returns the completed endpoint (`src.port` filled in). On failure, no port
    /// was reserved.
    fn fetch(
        &self,
        family: AddressFamily,
        iface: InterfaceIndex,
        dst: DestEndpoint,
        src: SrcEndpoint,
    ) -> Result<SrcEndpoint, Exhausted>;

    /// Return a previously fetched `(iface, dst, src)` triple to the pool.
    fn release(&self, iface: InterfaceIndex, dst: DestEndpoint, src: SrcEndpoint);

    /// Whether a sub-pool is allocated for `core` under `(family, iface, addr)`.
    /// Consulted only in addr-mode; port-mode pools never call this.
    fn sub_pool_configured(
        &self,
        family: AddressFamily,
        iface: InterfaceIndex,
        addr: LocalAddr,
        core: CoreId,
    ) -> bool;
}
