//! Protocol version and the compatibility rule

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAJOR: u32 = 2;
pub const MINOR: u32 = 0;
pub const PATCH: u32 = 0;

/// Version triple exchanged during the peering handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub fn current() -> Self {
        Self { major: MAJOR, minor: MINOR, patch: PATCH }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Two protocol versions are compatible iff they share the major number.
pub fn compatible(a: ProtocolVersion, b: ProtocolVersion) -> bool {
    a.major == b.major
}
