// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! §4.8: the reload reconciler.
//!
//! On a configuration reload, a higher-level controller (the health-checker
//! daemon, out of scope) diffs the local-address group of an old virtual-service
//! generation against a new one and drives the pool towards the new group with a
//! minimal set of operations: deletes for addresses no longer present, and
//! nothing at all for addresses present in both (they keep their `refcnt` and
//! `conn_counts` untouched, merely flagged `reloaded`). Addresses present only in
//! the new group are left for `laddr_add` to pick up lazily on first use; this
//! reconciler never adds.

use crate::addr::{AddressFamily, LocalAddr};
use crate::pool::ServiceLocalPool;
use crate::status::Status;

/// One local-address entry as it appears in a configuration generation.
///
/// Equality for reconciliation purposes is the `(addr, ifname)` pair (the
/// `range` component of the source's `(addr, range, ifname)` triple collapses
/// here because this crate's [`crate::addr::LocalAddress`] models one concrete
/// address, not an address range; range expansion belongs to the configuration
/// layer, out of scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileEntry {
    pub family: AddressFamily,
    pub addr: LocalAddr,
    pub ifname: String,
}

/// Outcome of one [`reconcile`] call.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Addresses successfully deleted because they dropped out of the new group.
    pub deleted: Vec<LocalAddr>,
    /// Addresses present in both groups, matched and flagged `reloaded`.
    pub survived: Vec<LocalAddr>,
    /// Per-address delete status, including any that came back `Busy`.
    pub delete_statuses: Vec<(LocalAddr, Status)>,
}

/// Diff `old` against `new` and apply the minimal delete set to `pool`.
///
/// A `Busy` delete (the address still has outstanding binds) is recorded in
/// [`ReconcileReport::delete_statuses`] but does not stop the pass from
/// continuing to the next entry — the next reload will retry it.
pub fn reconcile(pool: &ServiceLocalPool, old: &[ReconcileEntry], new: &[ReconcileEntry]) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for entry in old {
        let still_present = new
            .iter()
            .any(|n| n.family == entry.family && n.addr == entry.addr && n.ifname == entry.ifname);

        if still_present {
            if pool.mark_reloaded(entry.family, entry.addr) {
                report.survived.push(entry.addr);
            }
            continue;
        }

        let status = pool.delete(entry.family, entry.addr);
        if status == Status::Busy {
            tracing::debug!(ifname = %entry.ifname, "reload: address busy, will retry next reload");
        }
        report.delete_statuses.push((entry.addr, status));
        if status == Status::Ok {
            report.deleted.push(entry.addr);
        }
    }

    tracing::debug!(deleted = report.deleted.len(), survived = report.survived.len(), "reload reconciliation complete");
    report
}
