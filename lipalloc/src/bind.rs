// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `bind`/`unbind`: the per-connection fast path invoked by the packet pipeline
//! when a flow is admitted or torn down.

use std::net::IpAddr;

use crate::addr::LocalAddr;
use crate::connection::{Connection, Proto};
use crate::pool::{CoreId, SchedulerKind, ServiceLocalPool};
use crate::sapool::{DestEndpoint, SaPool, SrcEndpoint};
use crate::status::Status;

/// §4.2: pick a [`crate::addr::LocalAddress`] from `pool`, reserve a source
/// port from `sa`, and write the resulting endpoint into `conn`.
///
/// Template connections are accepted without allocating. Any protocol other
/// than TCP/UDP is rejected with [`Status::NotSupported`] before anything is
/// touched.
pub fn bind(
    conn: &mut Connection,
    pool: &ServiceLocalPool,
    core: CoreId,
    scheduler: SchedulerKind,
    sa: &dyn SaPool,
) -> Status {
    match conn.proto() {
        Proto::Tcp | Proto::Udp => {}
        Proto::Other => return Status::NotSupported,
    }
    if conn.is_template() {
        return Status::Ok;
    }

    let (daddr, dport) = conn.destination();
    let dst = DestEndpoint { addr: daddr, port: dport };

    match pool.select_and_fetch(core, scheduler, dst, sa) {
        Ok((entry, src)) => {
            entry.conn_opened();
            let laddr_ip = match entry.addr() {
                LocalAddr::V4(a) => IpAddr::V4(a),
                LocalAddr::V6(a) => IpAddr::V6(a),
            };
            let sport = src
                .port
                .expect("SA-pool fetch returned Ok without filling the source port");
            tracing::trace!(core = core.as_usize(), laddr = %laddr_ip, lport = sport, "bind succeeded");
            conn.set_bound(laddr_ip, sport, entry);
            Status::Ok
        }
        Err(status) => {
            tracing::debug!(core = core.as_usize(), daddr = %daddr, dport, ?status, "bind failed");
            status
        }
    }
}

/// §4.3: release the `(iface, dst, src)` tuple `bind` reserved, if any, and
/// clear `conn.local`. A no-op on template connections or connections that
/// never bound.
pub fn unbind(conn: &mut Connection, sa: &dyn SaPool) -> Status {
    if conn.is_template() {
        return Status::Ok;
    }
    let Some(local) = conn.local().cloned() else {
        return Status::Ok;
    };

    let (daddr, dport) = conn.destination();
    let (_laddr, lport) = conn
        .local_endpoint()
        .expect("a bound connection always carries a local endpoint");
    let dst = DestEndpoint { addr: daddr, port: dport };
    let src = SrcEndpoint {
        addr: local.addr(),
        port: Some(lport),
    };

    sa.release(local.iface(), dst, src);
    local.conn_closed();
    local.release();
    conn.take_local();
    Status::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddressFamily;
    use crate::iface::InterfaceIndex;
    use crate::pool::{EnabledCoreMask, GlobalConfig, PoolMode};
    use crate::sapool::Exhausted;
    use concurrency::sync::Arc;
    use std::net::Ipv4Addr;

    struct FixedPort(u16);
    impl SaPool for FixedPort {
        fn fetch(
            &self,
            _family: AddressFamily,
            _iface: InterfaceIndex,
            _dst: DestEndpoint,
            mut src: SrcEndpoint,
        ) -> Result<SrcEndpoint, Exhausted> {
            src.port = Some(self.0);
            Ok(src)
        }
        fn release(&self, _iface: InterfaceIndex, _dst: DestEndpoint, _src: SrcEndpoint) {}
        fn sub_pool_configured(
            &self,
            _family: AddressFamily,
            _iface: InterfaceIndex,
            _addr: LocalAddr,
            _core: CoreId,
        ) -> bool {
            true
        }
    }

    fn pool_with_one_v4(addr: Ipv4Addr, sa: &dyn SaPool) -> ServiceLocalPool {
        let config = Arc::new(GlobalConfig::new(PoolMode::PortLcoreMapping, EnabledCoreMask::from_bits(1)));
        let pool = ServiceLocalPool::new(config);
        pool.add(AddressFamily::V4, LocalAddr::V4(addr), InterfaceIndex::new(0), sa);
        pool
    }

    #[test]
    fn bind_then_unbind_round_trips_s1() {
        let sa = FixedPort(1025);
        let pool = pool_with_one_v4(Ipv4Addr::new(10, 0, 0, 1), &sa);
        let mut conn = Connection::new(Proto::Tcp, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), 80);

        let status = bind(&mut conn, &pool, CoreId::new(0), SchedulerKind::RoundRobin, &sa);
        assert_eq!(status, Status::Ok);
        let (laddr, lport) = conn.local_endpoint().unwrap();
        assert_eq!(laddr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(lport, 1025);
        assert_eq!(conn.local().unwrap().refcnt(), 1);
        assert_eq!(conn.local().unwrap().conn_counts(), 1);

        let status = unbind(&mut conn, &sa);
        assert_eq!(status, Status::Ok);
        assert!(conn.local().is_none());
    }

    #[test]
    fn template_connections_skip_allocation() {
        let sa = FixedPort(1025);
        let pool = pool_with_one_v4(Ipv4Addr::new(10, 0, 0, 1), &sa);
        let mut conn = Connection::template(Proto::Tcp, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), 80);
        assert_eq!(bind(&mut conn, &pool, CoreId::new(0), SchedulerKind::RoundRobin, &sa), Status::Ok);
        assert!(conn.local().is_none());
    }

    #[test]
    fn unsupported_protocol_is_rejected() {
        let sa = FixedPort(1025);
        let pool = pool_with_one_v4(Ipv4Addr::new(10, 0, 0, 1), &sa);
        let mut conn = Connection::new(Proto::Other, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), 80);
        assert_eq!(
            bind(&mut conn, &pool, CoreId::new(0), SchedulerKind::RoundRobin, &sa),
            Status::NotSupported
        );
    }
}
