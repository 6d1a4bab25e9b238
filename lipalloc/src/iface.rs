// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network interface handles.
//!
//! The allocator never programs interfaces itself; it only needs a stable handle to
//! attach to a [`crate::addr::LocalAddress`] and a name-based lookup so that
//! `laddr_add` can reject an unknown interface with [`Status::NotExist`](crate::status::Status::NotExist).

use std::collections::HashMap;
use std::fmt;

use concurrency::sync::RwLock;

/// Opaque handle to a network interface, stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct InterfaceIndex(u32);

impl InterfaceIndex {
    /// Wrap a raw interface index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw interface index.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InterfaceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Error returned when a proposed interface name is not admissible.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IllegalInterfaceName {
    /// Name is empty.
    #[error("interface name must not be empty")]
    Empty,
    /// Name exceeds the kernel's `IFNAMSIZ`-derived limit.
    #[error("interface name too long: {0:?}")]
    TooLong(String),
    /// Name contains a byte outside of ASCII.
    #[error("interface name is not ascii: {0:?}")]
    NotAscii(String),
}

/// Maximum interface name length, matching the kernel's `IFNAMSIZ` minus the
/// terminating null byte.
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// A validated network interface name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceName(String);

impl InterfaceName {
    /// Borrow the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        if name.is_empty() {
            return Err(IllegalInterfaceName::Empty);
        }
        if name.len() > MAX_INTERFACE_NAME_LEN {
            return Err(IllegalInterfaceName::TooLong(name.to_string()));
        }
        if !name.is_ascii() {
            return Err(IllegalInterfaceName::NotAscii(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name-to-handle lookup for interfaces known to the dataplane.
///
/// The allocator never creates or removes interfaces; this table is populated by
/// the host process during startup and treated as a read lookup by the allocator.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    by_name: RwLock<HashMap<InterfaceName, InterfaceIndex>>,
}

impl InterfaceTable {
    /// Build an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: RwLock::new(HashMap::new()),
        }
    }

    /// Register an interface under the given name, overwriting any prior mapping.
    pub fn insert(&self, name: InterfaceName, index: InterfaceIndex) {
        self.by_name.write().unwrap().insert(name, index);
    }

    /// Resolve a name to its handle, if known.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<InterfaceIndex> {
        self.by_name
            .read()
            .unwrap()
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, idx)| *idx)
    }
}
