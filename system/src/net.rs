use std::{
    fmt::{self, Display},
    str::FromStr,
};

use displaydoc::Display as DocDisplay;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, DocDisplay)]
pub enum HardwareAddressError {
    /// hardware address `{0}` must have 12 hex digits
    Length(String),
    /// hardware address `{0}` contains a non-hex digit
    Digit(String),
}

/// Link-layer (MAC) address of a virtual network interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareAddress([u8; 6]);

impl HardwareAddress {
    /// What a hypervisor reports for a dynamic interface that has not booted yet.
    pub const UNASSIGNED: HardwareAddress = HardwareAddress([0; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_unassigned(&self) -> bool {
        *self == Self::UNASSIGNED
    }

    /// `00155D010203`
    pub fn to_bare_upper(&self) -> String {
        self.0.iter().map(|o| format!("{o:02X}")).collect()
    }

    /// `00-15-5d-01-02-03`
    pub fn to_dashed(&self) -> String {
        self.join('-')
    }

    fn join(&self, separator: char) -> String {
        let mut out = String::with_capacity(17);
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.push_str(&format!("{octet:02x}"));
        }
        out
    }
}

impl Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(':'))
    }
}

impl FromStr for HardwareAddress {
    type Err = HardwareAddressError;

    /// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` and `AABBCCDDEEFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != 12 {
            return Err(HardwareAddressError::Length(s.to_owned()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HardwareAddressError::Digit(s.to_owned()));
        }
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            let pair = digits
                .get(i * 2..i * 2 + 2)
                .ok_or_else(|| HardwareAddressError::Digit(s.to_owned()))?;
            *octet = u8::from_str_radix(pair, 16)
                .map_err(|_| HardwareAddressError::Digit(s.to_owned()))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for HardwareAddress {
    type Error = HardwareAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HardwareAddress> for String {
    fn from(value: HardwareAddress) -> Self {
        value.to_string()
    }
}
