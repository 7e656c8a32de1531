//! IP addresses, subnets and transport-layer ports
//!
//! Addresses are stored as 16 bytes in network order. IPv4 addresses use
//! the v4-mapped-v6 representation (`::ffff:a.b.c.d`), which doubles as
//! the family flag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Prefix that marks an IPv6 address as v4-mapped.
const V4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

/// An IPv4 or IPv6 address in network byte order.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    borsh::BorshSerialize,
    borsh::BorshDeserialize,
)]
#[repr(transparent)]
pub struct Address(#[serde(with = "serde_bytes")] pub(crate) [u8; 16]);

impl Address {
    pub const NUM_BYTES: usize = 16;

    /// The unspecified address (`::`).
    pub fn unspecified() -> Self {
        Self([0u8; 16])
    }

    /// Construct from an IPv4 address, stored v4-mapped.
    pub fn from_v4(v4: Ipv4Addr) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..12].copy_from_slice(&V4_MAPPED_PREFIX);
        bytes[12..].copy_from_slice(&v4.octets());
        Self(bytes)
    }

    /// Construct from an IPv6 address.
    pub fn from_v6(v6: Ipv6Addr) -> Self {
        Self(v6.octets())
    }

    /// True if this address embeds an IPv4 address.
    pub fn is_v4(&self) -> bool {
        self.0[..12] == V4_MAPPED_PREFIX
    }

    /// True if this address is a native IPv6 address.
    pub fn is_v6(&self) -> bool {
        !self.is_v4()
    }

    /// Raw bytes in network order. IPv4 addresses use the v4-mapped form.
    pub fn bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Mask out the lower bits of the address, keeping `top_bits_to_keep`
    /// bits counted from the highest-order bit. The count is always
    /// interpreted relative to the 128-bit width, even for IPv4 addresses:
    /// to compute `192.168.1.2/16`, pass 112 (96 + 16). Values above 128
    /// fail and leave the address unmodified.
    pub fn mask(&mut self, top_bits_to_keep: u8) -> bool {
        if top_bits_to_keep > 128 {
            return false;
        }
        let full = usize::from(top_bits_to_keep / 8);
        let rem = top_bits_to_keep % 8;
        if full < 16 {
            if rem == 0 {
                self.0[full] = 0;
            } else {
                self.0[full] &= 0xffu8 << (8 - rem);
            }
            for b in &mut self.0[full + 1..] {
                *b = 0;
            }
        }
        true
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::from_v4(v4),
            IpAddr::V6(v6) => Self::from_v6(v6),
        }
    }
}

impl From<Address> for IpAddr {
    fn from(addr: Address) -> Self {
        if addr.is_v4() {
            let mut o = [0u8; 4];
            o.copy_from_slice(&addr.0[12..]);
            IpAddr::V4(Ipv4Addr::from(o))
        } else {
            IpAddr::V6(Ipv6Addr::from(addr.0))
        }
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IpAddr::from_str(s).map(Self::from)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        IpAddr::from(*self).fmt(f)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// An IP prefix: a masked network address plus a prefix length.
///
/// The length is stored relative to the 128-bit width; accessors and
/// display use the family-relative form.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    borsh::BorshSerialize,
    borsh::BorshDeserialize,
)]
pub struct Subnet {
    network: Address,
    raw_len: u8,
}

impl Subnet {
    /// Build a subnet from an address and a family-relative prefix length
    /// (0–32 for IPv4, 0–128 for IPv6). The network address is masked.
    pub fn new(addr: Address, length: u8) -> Option<Self> {
        let raw_len = if addr.is_v4() {
            if length > 32 {
                return None;
            }
            96 + length
        } else {
            if length > 128 {
                return None;
            }
            length
        };
        let mut network = addr;
        network.mask(raw_len);
        Some(Self { network, raw_len })
    }

    pub fn network(&self) -> &Address {
        &self.network
    }

    /// Family-relative prefix length.
    pub fn length(&self) -> u8 {
        if self.network.is_v4() {
            self.raw_len - 96
        } else {
            self.raw_len
        }
    }

    /// True if `addr` lies within this prefix.
    pub fn contains(&self, addr: &Address) -> bool {
        let mut masked = *addr;
        masked.mask(self.raw_len);
        masked == self.network
    }
}

impl Default for Subnet {
    /// The all-encompassing `::/0` prefix.
    fn default() -> Self {
        Self { network: Address::unspecified(), raw_len: 0 }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.length())
    }
}

impl fmt::Debug for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subnet({})", self)
    }
}

/// Transport-layer protocol of a port.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    borsh::BorshSerialize,
    borsh::BorshDeserialize,
)]
pub enum Protocol {
    Unknown,
    Tcp,
    Udp,
    Icmp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Unknown => "?",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        };
        f.write_str(s)
    }
}

/// A transport-layer port number tagged with its protocol.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    borsh::BorshSerialize,
    borsh::BorshDeserialize,
)]
pub struct Port {
    number: u16,
    protocol: Protocol,
}

impl Port {
    pub fn new(number: u16, protocol: Protocol) -> Self {
        Self { number, protocol }
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self)
    }
}

impl FromStr for Port {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, proto) = match s.split_once('/') {
            Some((num, proto)) => (num, proto),
            None => (s, "?"),
        };
        let number = num.parse::<u16>()?;
        let protocol = match proto {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "icmp" => Protocol::Icmp,
            _ => Protocol::Unknown,
        };
        Ok(Self { number, protocol })
    }
}
