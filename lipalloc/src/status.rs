// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Status codes returned by control-plane and fast-path operations.
//!
//! There is deliberately a single flat enumeration rather than one error type per
//! operation: every caller (fast-path `bind`/`unbind`, control-plane handlers, the
//! reload reconciler) speaks the same vocabulary, and logging is a side effect that
//! never changes which variant is returned.

use thiserror::Error;

/// Outcome of an allocator operation.
///
/// `Status::Ok` carries no payload; callers that need a value (e.g. `laddr_getall`)
/// receive it alongside the status rather than inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    /// Operation completed as requested.
    #[error("ok")]
    Ok,
    /// Null/malformed arguments, or a match filter that failed to parse.
    #[error("invalid argument")]
    Invalid,
    /// Protocol other than TCP/UDP, or an unsupported control-plane opcode.
    #[error("not supported")]
    NotSupported,
    /// Service key did not resolve to a known virtual service.
    #[error("no matching service")]
    NoService,
    /// Interface or address lookup missed.
    #[error("does not exist")]
    NotExist,
    /// Duplicate add of an already-present address.
    #[error("already exists")]
    Exists,
    /// The lport/laddr pool is exhausted for this attempt.
    #[error("resource exhausted")]
    Resource,
    /// Delete/flush blocked because `refcnt` was non-zero.
    #[error("busy")]
    Busy,
    /// Allocation failure.
    #[error("out of memory")]
    NoMem,
}

impl Status {
    /// `true` for [`Status::Ok`].
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}
