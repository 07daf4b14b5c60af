//! IPv4 address blocks assigned to link segments.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error produced when an address block string cannot be parsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid address block `{0}`, expected a.b.c.d/len")]
pub struct ParseBlockError(String);

/// IPv4 network given by its base address and prefix length, e.g. `10.1.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressBlock {
    base: Ipv4Addr,
    prefix_len: u8,
}

impl AddressBlock {
    /// Creates a block, host bits of `base` are cleared.
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Option<Self> {
        if prefix_len > 32 {
            return None;
        }
        let base = Ipv4Addr::from(u32::from(base) & Self::mask_bits(prefix_len));
        Some(Self { base, prefix_len })
    }

    fn mask_bits(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len as u32)
        }
    }

    /// Network address of the block.
    pub fn base(&self) -> Ipv4Addr {
        self.base
    }

    /// Prefix length of the block.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn first(&self) -> u32 {
        u32::from(self.base)
    }

    fn last(&self) -> u32 {
        self.first() | !Self::mask_bits(self.prefix_len)
    }

    /// Returns true if two blocks share at least one address.
    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }

    /// Returns true if the address belongs to the block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let addr = u32::from(addr);
        self.first() <= addr && addr <= self.last()
    }

    /// Returns the `index`-th host address of the block (starting from 1),
    /// or `None` if the block is too small.
    pub fn host(&self, index: u32) -> Option<Ipv4Addr> {
        let addr = self.first().checked_add(index)?;
        // the last address of the block is reserved for broadcast
        if index == 0 || addr >= self.last() {
            return None;
        }
        Some(Ipv4Addr::from(addr))
    }

    /// Returns the `index`-th block of the same size following this one.
    pub fn nth_next(&self, index: u32) -> Option<AddressBlock> {
        let size = (self.last() - self.first()).checked_add(1)?;
        let base = self.first().checked_add(size.checked_mul(index)?)?;
        AddressBlock::new(Ipv4Addr::from(base), self.prefix_len)
    }
}

impl FromStr for AddressBlock {
    type Err = ParseBlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseBlockError(s.to_string());
        let (addr, len) = s.trim().split_once('/').ok_or_else(err)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| err())?;
        let len: u8 = len.parse().map_err(|_| err())?;
        AddressBlock::new(addr, len).ok_or_else(err)
    }
}

impl TryFrom<String> for AddressBlock {
    type Error = ParseBlockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddressBlock> for String {
    fn from(block: AddressBlock) -> Self {
        block.to_string()
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix_len)
    }
}
