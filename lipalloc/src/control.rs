// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Control-plane entry points: Add / Delete / Flush / Enumerate.
//!
//! The transport these travel over (a request/reply channel the host supplies)
//! is out of scope; this module only implements what happens once a request has
//! already been decoded into the fields below.

use std::collections::HashMap;

use concurrency::sync::{Arc, RwLock};

use crate::addr::{AddressFamily, LocalAddr};
use crate::connection::Proto;
use crate::iface::InterfaceTable;
use crate::pool::{LocalAddressSnapshot, ServiceLocalPool};
use crate::sapool::SaPool;
use crate::status::Status;

/// A parsed match filter. The grammar of the filter language is owned by the
/// configuration-channel transport (out of scope); here it is an opaque,
/// already-validated token used only for service-key equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchFilter(String);

impl MatchFilter {
    /// Parse a raw filter expression. Fails with [`Status::Invalid`] on a
    /// malformed (here: empty) expression.
    pub fn parse(raw: &str) -> Result<Self, Status> {
        if raw.trim().is_empty() {
            return Err(Status::Invalid);
        }
        Ok(Self(raw.to_string()))
    }
}

/// Identifies a virtual service: `(af, proto, vaddr, vport, fwmark, match)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub family: AddressFamily,
    pub proto: Proto,
    pub vaddr: LocalAddr,
    pub vport: u16,
    pub fwmark: u32,
    pub match_filter: Option<MatchFilter>,
}

/// Registry of known virtual services and their [`ServiceLocalPool`]s.
///
/// Populated by whatever external component owns virtual-service lifecycle
/// (out of scope); the allocator only ever looks services up by key.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<ServiceKey, Arc<ServiceLocalPool>>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the pool backing `key`.
    pub fn register(&self, key: ServiceKey, pool: Arc<ServiceLocalPool>) {
        self.services.write().unwrap().insert(key, pool);
    }

    pub fn unregister(&self, key: &ServiceKey) {
        self.services.write().unwrap().remove(key);
    }

    fn lookup(&self, key: &ServiceKey) -> Option<Arc<ServiceLocalPool>> {
        self.services.read().unwrap().get(key).cloned()
    }
}

/// §4.4 Add.
pub fn laddr_add(
    registry: &ServiceRegistry,
    ifaces: &InterfaceTable,
    sa: &dyn SaPool,
    key: &ServiceKey,
    family: AddressFamily,
    addr: LocalAddr,
    ifname: &str,
) -> Status {
    let Some(pool) = registry.lookup(key) else {
        tracing::debug!(?key, "laddr_add: no matching service");
        return Status::NoService;
    };
    let Some(iface) = ifaces.lookup(ifname) else {
        tracing::warn!(ifname, "laddr_add: unknown interface");
        return Status::NotExist;
    };
    let status = pool.add(family, addr, iface, sa);
    if status != Status::Ok {
        tracing::debug!(?key, ?status, "laddr_add failed");
    }
    status
}

/// §4.5 Delete.
pub fn laddr_del(registry: &ServiceRegistry, key: &ServiceKey, family: AddressFamily, addr: LocalAddr) -> Status {
    let Some(pool) = registry.lookup(key) else {
        return Status::NoService;
    };
    let status = pool.delete(family, addr);
    if status == Status::Busy {
        tracing::debug!(?key, "laddr_del: address busy, not removed");
    }
    status
}

/// §4.6 Flush.
pub fn laddr_flush(registry: &ServiceRegistry, key: &ServiceKey) -> Status {
    let Some(pool) = registry.lookup(key) else {
        return Status::NoService;
    };
    let status = pool.flush();
    if status == Status::Busy {
        tracing::debug!(?key, "laddr_flush: some addresses left in place, still busy");
    }
    status
}

/// Reply payload for `Get all`: the echoed service key plus a snapshot row per
/// address.
#[derive(Debug, Clone)]
pub struct EnumerateReply {
    pub key: ServiceKey,
    pub entries: Vec<LocalAddressSnapshot>,
}

/// §4.7 Enumerate.
pub fn laddr_getall(registry: &ServiceRegistry, key: &ServiceKey) -> Result<EnumerateReply, Status> {
    let Some(pool) = registry.lookup(key) else {
        return Err(Status::NoService);
    };
    Ok(EnumerateReply {
        key: key.clone(),
        entries: pool.getall(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::{InterfaceIndex, InterfaceName};
    use crate::pool::{CoreId, EnabledCoreMask, GlobalConfig, PoolMode};
    use crate::sapool::{DestEndpoint, Exhausted, SrcEndpoint};
    use std::net::Ipv4Addr;
    use tracing_test::{logs_contain, traced_test};

    struct AlwaysOk;
    impl SaPool for AlwaysOk {
        fn fetch(
            &self,
            _family: AddressFamily,
            _iface: InterfaceIndex,
            _dst: DestEndpoint,
            mut src: SrcEndpoint,
        ) -> Result<SrcEndpoint, Exhausted> {
            src.port = Some(1025);
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

    fn key() -> ServiceKey {
        ServiceKey {
            family: AddressFamily::V4,
            proto: Proto::Tcp,
            vaddr: LocalAddr::V4(Ipv4Addr::new(192, 0, 2, 100)),
            vport: 80,
            fwmark: 0,
            match_filter: None,
        }
    }

    #[test]
    fn unknown_service_is_rejected() {
        let registry = ServiceRegistry::new();
        let ifaces = InterfaceTable::new();
        let sa = AlwaysOk;
        assert_eq!(
            laddr_add(&registry, &ifaces, &sa, &key(), AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), "eth0"),
            Status::NoService
        );
    }

    #[test]
    #[traced_test]
    fn add_rejects_unknown_interface() {
        let registry = ServiceRegistry::new();
        let ifaces = InterfaceTable::new();
        let sa = AlwaysOk;
        let config = Arc::new(GlobalConfig::new(PoolMode::PortLcoreMapping, EnabledCoreMask::from_bits(1)));
        registry.register(key(), Arc::new(ServiceLocalPool::new(config)));
        assert_eq!(
            laddr_add(&registry, &ifaces, &sa, &key(), AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), "eth0"),
            Status::NotExist
        );
        assert!(logs_contain("unknown interface"));
    }

    #[test]
    fn add_then_enumerate() {
        let registry = ServiceRegistry::new();
        let ifaces = InterfaceTable::new();
        ifaces.insert(InterfaceName::try_from("eth0").unwrap(), InterfaceIndex::new(0));
        let sa = AlwaysOk;
        let config = Arc::new(GlobalConfig::new(PoolMode::PortLcoreMapping, EnabledCoreMask::from_bits(1)));
        registry.register(key(), Arc::new(ServiceLocalPool::new(config)));

        assert_eq!(
            laddr_add(&registry, &ifaces, &sa, &key(), AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), "eth0"),
            Status::Ok
        );
        assert_eq!(
            laddr_add(&registry, &ifaces, &sa, &key(), AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), "eth0"),
            Status::Exists
        );

        let reply = laddr_getall(&registry, &key()).unwrap();
        assert_eq!(reply.entries.len(), 1);
        assert_eq!(reply.entries[0].nport_conflict, 0);
    }

    #[test]
    fn match_filter_rejects_empty() {
        assert_eq!(MatchFilter::parse(""), Err(Status::Invalid));
        assert!(MatchFilter::parse("vip-foo").is_ok());
    }
}
