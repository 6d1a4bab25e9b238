// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

//! Local address and port (LIP/lport) allocation for a Full-NAT dataplane.
//!
//! When the balancer rewrites a client-to-service flow into a
//! balancer-to-real-server flow, it needs a fresh source endpoint `(lip,
//! lport)` that is unique towards the destination across the fleet, and whose
//! reply traffic lands back on the worker core that owns the connection. This
//! crate is that allocator: it owns the per-service [`pool::LocalAddressSnapshot`]-
//! producing address pools, the [`bind`]/[`unbind`] fast path the packet
//! pipeline calls per connection, the [`control`] operations a management
//! plane uses to add/remove/flush/enumerate addresses, and the [`reload`]
//! reconciler a higher-level controller drives on configuration changes.
//!
//! # What this crate does not do
//!
//! The ephemeral port space and hardware flow-director programming live behind
//! [`sapool::SaPool`] — an external collaborator this crate only calls through.
//! The connection table, the real-server scheduler, the configuration-channel
//! transport, and tunnel/blacklist/virtual-server-group maintenance are all
//! out of scope; callers wire those in separately.
//!
//! # Example
//!
//! ```
//! use lipalloc::addr::{AddressFamily, LocalAddr};
//! use lipalloc::connection::{Connection, Proto};
//! use lipalloc::iface::InterfaceIndex;
//! use lipalloc::pool::{CoreId, EnabledCoreMask, GlobalConfig, PoolMode, SchedulerKind, ServiceLocalPool};
//! use lipalloc::sapool::{DestEndpoint, Exhausted, SaPool, SrcEndpoint};
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//!
//! struct FixedPort(u16);
//! impl SaPool for FixedPort {
//!     fn fetch(&self, _family: AddressFamily, _iface: InterfaceIndex, _dst: DestEndpoint, mut src: SrcEndpoint) -> Result<SrcEndpoint, Exhausted> {
//!         src.port = Some(self.0);
//!         Ok(src)
//!     }
//!     fn release(&self, _iface: InterfaceIndex, _dst: DestEndpoint, _src: SrcEndpoint) {}
//!     fn sub_pool_configured(&self, _family: AddressFamily, _iface: InterfaceIndex, _addr: LocalAddr, _core: CoreId) -> bool {
//!         true
//!     }
//! }
//!
//! let config = Arc::new(GlobalConfig::new(PoolMode::PortLcoreMapping, EnabledCoreMask::from_bits(1)));
//! let pool = ServiceLocalPool::new(config);
//! let sa = FixedPort(1025);
//! pool.add(AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), InterfaceIndex::new(0), &sa);
//!
//! let mut conn = Connection::new(Proto::Tcp, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), 80);
//! let status = lipalloc::bind::bind(&mut conn, &pool, CoreId::new(0), SchedulerKind::RoundRobin, &sa);
//! assert!(status.is_ok());
//! lipalloc::bind::unbind(&mut conn, &sa);
//! ```

pub mod addr;
pub mod bind;
pub mod connection;
pub mod control;
pub mod iface;
pub mod pool;
pub mod reload;
pub mod sapool;
pub mod status;

pub use addr::{AddressFamily, LocalAddr, LocalAddress};
pub use connection::{Connection, Proto};
pub use pool::{CoreId, EnabledCoreMask, GlobalConfig, PoolMode, SchedulerKind, ServiceLocalPool};
pub use sapool::SaPool;
pub use status::Status;
