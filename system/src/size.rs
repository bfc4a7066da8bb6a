use std::{
    fmt::{self, Display},
    str::FromStr,
};

use displaydoc::Display as DocDisplay;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuCount(u16);

impl CpuCount {
    pub const fn new(count: u16) -> Self {
        Self(count)
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl Default for CpuCount {
    fn default() -> Self {
        Self(1)
    }
}

impl Display for CpuCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CpuCount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, DocDisplay)]
pub enum ByteSizeError {
    /// size is empty
    Empty,
    /// invalid size number in `{0}`
    Number(String),
    /// unknown size unit `{0}` (expected B, KB, MB, GB or TB)
    Unit(String),
    /// size `{0}` overflows 64 bits
    Overflow(String),
}

/// Parse sizes like `512MB`, `40 GiB` or `1073741824`. Units are binary.
fn parse_bytes(input: &str) -> Result<u64, ByteSizeError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ByteSizeError::Empty);
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: u64 = number
        .parse()
        .map_err(|_| ByteSizeError::Number(input.to_owned()))?;
    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KIB,
        "M" | "MB" | "MIB" => MIB,
        "G" | "GB" | "GIB" => GIB,
        "T" | "TB" | "TIB" => TIB,
        other => return Err(ByteSizeError::Unit(other.to_owned())),
    };
    number
        .checked_mul(multiplier)
        .ok_or_else(|| ByteSizeError::Overflow(input.to_owned()))
}

fn fmt_bytes(bytes: u64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (unit, size) in [("TB", TIB), ("GB", GIB), ("MB", MIB), ("KB", KIB)] {
        if bytes >= size && bytes % size == 0 {
            return write!(f, "{}{unit}", bytes / size);
        }
    }
    write!(f, "{bytes}B")
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "SizeRepr", into = "u64")]
pub struct MemorySize(u64); // In bytes

impl MemorySize {
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_mebibytes(mib: u64) -> Self {
        Self(mib * MIB)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    pub fn mebibytes(&self) -> u64 {
        self.0 / MIB
    }
}

impl From<MemorySize> for u64 {
    fn from(value: MemorySize) -> Self {
        value.0
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_bytes(self.0, f)
    }
}

impl FromStr for MemorySize {
    type Err = ByteSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_bytes(s).map(Self)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "SizeRepr", into = "u64")]
pub struct DiskSize(u64); // In bytes

impl DiskSize {
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_gibibytes(gib: u64) -> Self {
        Self(gib * GIB)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    pub fn gibibytes(&self) -> u64 {
        self.0 / GIB
    }
}

impl From<DiskSize> for u64 {
    fn from(value: DiskSize) -> Self {
        value.0
    }
}

impl Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_bytes(self.0, f)
    }
}

impl FromStr for DiskSize {
    type Err = ByteSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_bytes(s).map(Self)
    }
}

// Sizes in config files are either a raw byte count or a string with a unit.
#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Bytes(u64),
    Text(String),
}

impl TryFrom<SizeRepr> for MemorySize {
    type Error = ByteSizeError;

    fn try_from(value: SizeRepr) -> Result<Self, Self::Error> {
        match value {
            SizeRepr::Bytes(bytes) => Ok(Self(bytes)),
            SizeRepr::Text(text) => text.parse(),
        }
    }
}

impl TryFrom<SizeRepr> for DiskSize {
    type Error = ByteSizeError;

    fn try_from(value: SizeRepr) -> Result<Self, Self::Error> {
        match value {
            SizeRepr::Bytes(bytes) => Ok(Self(bytes)),
            SizeRepr::Text(text) => text.parse(),
        }
    }
}
