// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-service [`LocalAddress`] pool: container, cursor, and the selection
//! policy (`pick_laddr`) and structural operations (`laddr_add`/`del`/`flush`/
//! `getall`) that operate on it.
//!
//! Two shapes exist, chosen once at process start and never again: a single
//! shared list under [`PoolMode::PortLcoreMapping`], or one list per core under
//! [`PoolMode::AddrLcoreMapping`]. Either way exactly one reader/writer lock
//! guards the whole container; every structural operation and every selection
//! takes the write side, because selection mutates the cursor.

use concurrency::sync::{Arc, RwLock};
use rand::Rng;

use crate::addr::{AddressFamily, LocalAddr, LocalAddress};
use crate::iface::InterfaceIndex;
use crate::sapool::{DestEndpoint, Exhausted, SaPool, SrcEndpoint};
use crate::status::Status;

/// A worker core index, `0..=63`. The allocator never assigns meaning to values
/// beyond the bits set in the process's [`EnabledCoreMask`]; `core > 63` is
/// simply never enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(u8);

impl CoreId {
    /// # Panics
    /// Panics if `core >= 64`; the mask has no bit to represent it.
    #[must_use]
    pub fn new(core: u8) -> Self {
        assert!(core < 64, "core id out of range: {core}");
        Self(core)
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The set of worker cores the dataplane runs on, as a 64-bit process-global
/// bitmask initialized once from the network layer.
///
/// The original source additionally hard-codes a `core > 63` bound that is
/// redundant with a 64-bit mask; we treat the mask as the sole authority (see
/// `DESIGN.md`) and never special-case an index above 63 beyond what the mask
/// already encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledCoreMask(u64);

impl EnabledCoreMask {
    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn is_enabled(self, core: CoreId) -> bool {
        self.0 & (1 << core.as_usize()) != 0
    }

    /// Iterate enabled cores in ascending order.
    pub fn iter(self) -> impl Iterator<Item = CoreId> {
        (0..64u8).filter(move |&c| self.0 & (1 << c) != 0).map(CoreId)
    }

    #[must_use]
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// Process-wide pooling discipline, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// FDIR mask is on low bits of lport; every core draws from one shared list.
    PortLcoreMapping,
    /// FDIR mask is on the address; each core owns a disjoint subset of addresses.
    AddrLcoreMapping,
}

/// The real-server scheduler in effect for a service, relevant only to the
/// port-mode step-size perturbation in `pick_laddr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    RoundRobin,
    WeightedRoundRobin,
    Other,
}

/// Immutable configuration shared by every [`ServiceLocalPool`] in the process:
/// pool mode, enabled-core mask, and the trial budget for `bind`. Published once
/// at init and read-only thereafter, so a plain `Arc` is sufficient synchronization.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pool_mode: PoolMode,
    enabled_cores: EnabledCoreMask,
    max_trials: usize,
}

impl GlobalConfig {
    #[must_use]
    pub fn new(pool_mode: PoolMode, enabled_cores: EnabledCoreMask) -> Self {
        Self {
            pool_mode,
            enabled_cores,
            max_trials: 16,
        }
    }

    #[must_use]
    pub fn with_max_trials(mut self, max_trials: usize) -> Self {
        self.max_trials = max_trials;
        self
    }

    #[must_use]
    pub fn pool_mode(&self) -> PoolMode {
        self.pool_mode
    }

    #[must_use]
    pub fn enabled_cores(&self) -> EnabledCoreMask {
        self.enabled_cores
    }
}

/// A snapshot row returned by `laddr_getall`. `nport_conflict` is reserved,
/// always zero (see `DESIGN.md` open questions), kept in the wire shape for
/// forward compatibility with a host that expects the field to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddressSnapshot {
    pub family: AddressFamily,
    pub addr: LocalAddr,
    pub nport_conflict: u32,
    pub nconns: u32,
}

#[derive(Debug, Default)]
struct ListState {
    laddrs: Vec<Arc<LocalAddress>>,
    cursor: Option<usize>,
}

impl ListState {
    fn snapshot(&self) -> impl Iterator<Item = LocalAddressSnapshot> + '_ {
        self.laddrs.iter().map(|entry| LocalAddressSnapshot {
            family: entry.family(),
            addr: entry.addr(),
            nport_conflict: 0,
            nconns: entry.conn_counts(),
        })
    }
}

/// §4.1: advance the cursor `step` times with wraparound, returning the new
/// position, or `None` if the list is empty.
fn advance_cursor(cursor: &mut Option<usize>, len: usize, step: usize) -> Option<usize> {
    if len == 0 {
        *cursor = None;
        return None;
    }
    for _ in 0..step {
        *cursor = Some(match *cursor {
            None => 0,
            Some(c) => (c + 1) % len,
        });
    }
    *cursor
}

/// Picks the step size for a port-mode selection: 2 with 5% probability under a
/// round-robin family scheduler (to avoid resonance with it), 1 otherwise.
fn port_mode_step(scheduler: SchedulerKind) -> usize {
    match scheduler {
        SchedulerKind::RoundRobin | SchedulerKind::WeightedRoundRobin => {
            if rand::rng().random_bool(0.05) { 2 } else { 1 }
        }
        SchedulerKind::Other => 1,
    }
}

/// §4.1 selection policy: advance the cursor and take a reference on the entry
/// it now points to. The caller already holds the pool's write lock.
fn select_from(list: &mut ListState, step: usize) -> Option<Arc<LocalAddress>> {
    let idx = advance_cursor(&mut list.cursor, list.laddrs.len(), step)?;
    let entry = list.laddrs[idx].clone();
    entry.hold();
    Some(entry)
}

fn fixup_cursor_on_remove(cursor: &mut Option<usize>, removed_idx: usize, new_len: usize) {
    match *cursor {
        Some(c) if c == removed_idx => {
            *cursor = if new_len == 0 { None } else { Some(removed_idx % new_len) };
        }
        Some(c) if c > removed_idx => {
            *cursor = Some(c - 1);
        }
        _ => {}
    }
}

enum Inner {
    Port(ListState),
    Addr(Vec<ListState>),
}

/// One virtual service's [`LocalAddress`] container: either a single shared list
/// (port-mode) or a per-core array of lists (addr-mode), guarded by one
/// reader/writer lock.
pub struct ServiceLocalPool {
    config: Arc<GlobalConfig>,
    inner: RwLock<Inner>,
}

impl ServiceLocalPool {
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        let inner = match config.pool_mode {
            PoolMode::PortLcoreMapping => Inner::Port(ListState::default()),
            PoolMode::AddrLcoreMapping => {
                Inner::Addr((0..64).map(|_| ListState::default()).collect())
            }
        };
        Self {
            config,
            inner: RwLock::new(inner),
        }
    }

    #[must_use]
    pub fn mode(&self) -> PoolMode {
        self.config.pool_mode
    }

    fn read_inner(&self) -> concurrency::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap()
    }

    /// §4.1 + §4.2 steps 2a/2b/2d/2e, run under one write-lock acquisition for
    /// the whole trial loop, as the design mandates.
    ///
    /// Returns the held [`LocalAddress`] and the completed source endpoint on
    /// success, or [`Status::Resource`] if no trial succeeded (no entries were
    /// left holding a reference in that case).
    pub fn select_and_fetch(
        &self,
        core: CoreId,
        scheduler: SchedulerKind,
        dst: DestEndpoint,
        sa: &dyn SaPool,
    ) -> Result<(Arc<LocalAddress>, SrcEndpoint), Status> {
        let mut guard = self.read_inner();
        match &mut *guard {
            Inner::Port(list) => {
                let trials = self.config.max_trials.min(list.laddrs.len());
                for _ in 0..trials {
                    let step = port_mode_step(scheduler);
                    let Some(entry) = select_from(list, step) else {
                        return Err(Status::Resource);
                    };
                    let src = SrcEndpoint::unbound(entry.addr());
                    match sa.fetch(entry.family(), entry.iface(), dst, src) {
                        Ok(filled) => return Ok((entry, filled)),
                        Err(Exhausted) => entry.release(),
                    }
                }
                Err(Status::Resource)
            }
            Inner::Addr(cores) => {
                let list = &mut cores[core.as_usize()];
                let trials = self.config.max_trials.min(list.laddrs.len());
                for _ in 0..trials {
                    let Some(entry) = select_from(list, 1) else {
                        return Err(Status::Resource);
                    };
                    if !sa.sub_pool_configured(entry.family(), entry.iface(), entry.addr(), core) {
                        entry.release();
                        continue;
                    }
                    let src = SrcEndpoint::unbound(entry.addr());
                    match sa.fetch(entry.family(), entry.iface(), dst, src) {
                        Ok(filled) => return Ok((entry, filled)),
                        Err(Exhausted) => entry.release(),
                    }
                }
                Err(Status::Resource)
            }
        }
    }

    /// §4.4 add.
    pub fn add(&self, family: AddressFamily, addr: LocalAddr, iface: InterfaceIndex, sa: &dyn SaPool) -> Status {
        let mut guard = self.read_inner();
        match &mut *guard {
            Inner::Port(list) => {
                if list.laddrs.iter().any(|e| e.matches(family, addr)) {
                    return Status::Exists;
                }
                list.laddrs.push(Arc::new(LocalAddress::new(addr, iface)));
                Status::Ok
            }
            Inner::Addr(cores) => {
                for core in self.config.enabled_cores.iter() {
                    if cores[core.as_usize()].laddrs.iter().any(|e| e.matches(family, addr)) {
                        return Status::Exists;
                    }
                }
                for core in self.config.enabled_cores.iter() {
                    if sa.sub_pool_configured(family, iface, addr, core) {
                        cores[core.as_usize()]
                            .laddrs
                            .push(Arc::new(LocalAddress::new(addr, iface)));
                    }
                }
                Status::Ok
            }
        }
    }

    /// Insert an already-constructed entry directly into a given core's list
    /// (port-mode: core is ignored and the entry lands in the shared list).
    /// Used by the reload reconciler to preserve a surviving entry's identity.
    pub(crate) fn insert_existing(&self, core: CoreId, entry: Arc<LocalAddress>) {
        let mut guard = self.read_inner();
        match &mut *guard {
            Inner::Port(list) => list.laddrs.push(entry),
            Inner::Addr(cores) => cores[core.as_usize()].laddrs.push(entry),
        }
    }

    /// §4.5 delete.
    pub fn delete(&self, family: AddressFamily, addr: LocalAddr) -> Status {
        let mut guard = self.read_inner();
        match &mut *guard {
            Inner::Port(list) => Self::delete_from_list(list, family, addr).unwrap_or(Status::NotExist),
            Inner::Addr(cores) => {
                let mut found = false;
                let mut busy = false;
                for core in self.config.enabled_cores.iter() {
                    match Self::delete_from_list(&mut cores[core.as_usize()], family, addr) {
                        Some(Status::Ok) => found = true,
                        Some(Status::Busy) => {
                            found = true;
                            busy = true;
                        }
                        _ => {}
                    }
                }
                if !found {
                    Status::NotExist
                } else if busy {
                    Status::Busy
                } else {
                    Status::Ok
                }
            }
        }
    }

    fn delete_from_list(list: &mut ListState, family: AddressFamily, addr: LocalAddr) -> Option<Status> {
        let idx = list.laddrs.iter().position(|e| e.matches(family, addr))?;
        if list.laddrs[idx].refcnt() > 0 {
            return Some(Status::Busy);
        }
        list.laddrs.remove(idx);
        fixup_cursor_on_remove(&mut list.cursor, idx, list.laddrs.len());
        Some(Status::Ok)
    }

    /// §4.6 flush.
    pub fn flush(&self) -> Status {
        let mut guard = self.read_inner();
        match &mut *guard {
            Inner::Port(list) => {
                if Self::flush_list(list) {
                    Status::Busy
                } else {
                    Status::Ok
                }
            }
            Inner::Addr(cores) => {
                let mut busy = false;
                for core in self.config.enabled_cores.iter() {
                    if Self::flush_list(&mut cores[core.as_usize()]) {
                        busy = true;
                    }
                }
                if busy {
                    Status::Busy
                } else {
                    Status::Ok
                }
            }
        }
    }

    fn flush_list(list: &mut ListState) -> bool {
        let mut busy = false;
        let mut idx = 0;
        while idx < list.laddrs.len() {
            if list.laddrs[idx].refcnt() > 0 {
                busy = true;
                idx += 1;
                continue;
            }
            list.laddrs.remove(idx);
            fixup_cursor_on_remove(&mut list.cursor, idx, list.laddrs.len());
        }
        busy
    }

    /// Mark the entry matching `(family, addr)` as having survived a reload, if
    /// present. Used by the reload reconciler; does not touch counters.
    pub fn mark_reloaded(&self, family: AddressFamily, addr: LocalAddr) -> bool {
        let mut guard = self.read_inner();
        match &mut *guard {
            Inner::Port(list) => Self::mark_in_list(list, family, addr),
            Inner::Addr(cores) => {
                let mut any = false;
                for core in self.config.enabled_cores.iter() {
                    if Self::mark_in_list(&mut cores[core.as_usize()], family, addr) {
                        any = true;
                    }
                }
                any
            }
        }
    }

    fn mark_in_list(list: &mut ListState, family: AddressFamily, addr: LocalAddr) -> bool {
        let Some(entry) = list.laddrs.iter().find(|e| e.matches(family, addr)) else {
            return false;
        };
        entry.mark_reloaded();
        true
    }

    /// §4.7 enumerate: materialize a snapshot under the write lock.
    #[must_use]
    pub fn getall(&self) -> Vec<LocalAddressSnapshot> {
        let mut guard = self.read_inner();
        match &mut *guard {
            Inner::Port(list) => list.snapshot().collect(),
            Inner::Addr(cores) => self
                .config
                .enabled_cores
                .iter()
                .flat_map(|core| cores[core.as_usize()].snapshot().collect::<Vec<_>>())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

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

    struct AlwaysExhausted;
    impl SaPool for AlwaysExhausted {
        fn fetch(
            &self,
            _family: AddressFamily,
            _iface: InterfaceIndex,
            _dst: DestEndpoint,
            _src: SrcEndpoint,
        ) -> Result<SrcEndpoint, Exhausted> {
            Err(Exhausted)
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

    fn dst() -> DestEndpoint {
        DestEndpoint {
            addr: std::net::IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)),
            port: 80,
        }
    }

    fn port_mode_config() -> Arc<GlobalConfig> {
        Arc::new(GlobalConfig::new(PoolMode::PortLcoreMapping, EnabledCoreMask::from_bits(0b11)))
    }

    #[test]
    fn single_address_bind_succeeds() {
        let pool = ServiceLocalPool::new(port_mode_config());
        let sa = AlwaysOk;
        assert_eq!(
            pool.add(AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), InterfaceIndex::new(0), &sa),
            Status::Ok
        );
        let (entry, src) = pool
            .select_and_fetch(CoreId::new(0), SchedulerKind::RoundRobin, dst(), &sa)
            .expect("bind should succeed");
        assert_eq!(entry.refcnt(), 1);
        assert_eq!(src.port, Some(1025));
    }

    #[test]
    fn exhaustion_leaves_no_refcnt_leak() {
        let pool = ServiceLocalPool::new(port_mode_config());
        let sa = AlwaysExhausted;
        pool.add(AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), InterfaceIndex::new(0), &sa);
        let err = pool
            .select_and_fetch(CoreId::new(0), SchedulerKind::RoundRobin, dst(), &sa)
            .unwrap_err();
        assert_eq!(err, Status::Resource);
        let rows = pool.getall();
        assert_eq!(rows[0].nconns, 0);
    }

    #[test]
    fn delete_busy_then_free() {
        let pool = ServiceLocalPool::new(port_mode_config());
        let sa = AlwaysOk;
        let addr = LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        pool.add(AddressFamily::V4, addr, InterfaceIndex::new(0), &sa);
        let (entry, _src) = pool
            .select_and_fetch(CoreId::new(0), SchedulerKind::RoundRobin, dst(), &sa)
            .unwrap();
        assert_eq!(pool.delete(AddressFamily::V4, addr), Status::Busy);
        entry.release();
        assert_eq!(pool.delete(AddressFamily::V4, addr), Status::Ok);
        assert!(pool.getall().is_empty());
    }

    #[test]
    fn round_robin_distribution_within_tolerance() {
        let pool = ServiceLocalPool::new(port_mode_config());
        let sa = AlwaysOk;
        for b in [b'A', b'B', b'C'] {
            pool.add(
                AddressFamily::V4,
                LocalAddr::V4(Ipv4Addr::new(10, 0, 0, b)),
                InterfaceIndex::new(0),
                &sa,
            );
        }
        let mut counts = [0u32; 3];
        for _ in 0..1000 {
            let (entry, _src) = pool
                .select_and_fetch(CoreId::new(0), SchedulerKind::RoundRobin, dst(), &sa)
                .unwrap();
            let LocalAddr::V4(a) = entry.addr() else { unreachable!() };
            counts[(a.octets()[3] - b'A') as usize] += 1;
            entry.release();
        }
        for c in counts {
            assert!((280..=380).contains(&c), "count out of tolerance: {c}");
        }
    }

    #[test]
    fn addr_mode_binds_from_the_calling_core_only() {
        let sa = AlwaysOk;
        let config = Arc::new(GlobalConfig::new(PoolMode::AddrLcoreMapping, EnabledCoreMask::from_bits(0b110)));
        let pool = ServiceLocalPool::new(config);
        pool.add(AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), InterfaceIndex::new(0), &sa);
        pool.add(AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), InterfaceIndex::new(0), &sa);

        let (core1, _) = pool
            .select_and_fetch(CoreId::new(1), SchedulerKind::Other, dst(), &sa)
            .expect("core 1 should have its own address");
        assert_eq!(core1.addr(), LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));

        let (core2, _) = pool
            .select_and_fetch(CoreId::new(2), SchedulerKind::Other, dst(), &sa)
            .expect("core 2 should have its own address");
        assert_eq!(core2.addr(), LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn addr_mode_skips_cores_without_a_configured_sub_pool() {
        struct OnlyCoreTwo;
        impl SaPool for OnlyCoreTwo {
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
            fn sub_pool_configured(&self, _family: AddressFamily, _iface: InterfaceIndex, _addr: LocalAddr, core: CoreId) -> bool {
                core == CoreId::new(2)
            }
        }

        let sa = OnlyCoreTwo;
        let config = Arc::new(GlobalConfig::new(PoolMode::AddrLcoreMapping, EnabledCoreMask::from_bits(0b110)));
        let pool = ServiceLocalPool::new(config);
        // `add` only inserts a core-1 entry for the address if its sub-pool is
        // configured there, which it isn't, so core 1's list stays empty.
        pool.add(AddressFamily::V4, LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), InterfaceIndex::new(0), &sa);

        let err = pool
            .select_and_fetch(CoreId::new(1), SchedulerKind::Other, dst(), &sa)
            .unwrap_err();
        assert_eq!(err, Status::Resource);

        let (entry, _src) = pool
            .select_and_fetch(CoreId::new(2), SchedulerKind::Other, dst(), &sa)
            .expect("core 2 has the address");
        assert_eq!(entry.addr(), LocalAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
