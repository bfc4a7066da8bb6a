use std::{
    convert::Infallible,
    fmt::{self, Display},
    str::FromStr,
};

use displaydoc::Display as DocDisplay;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a virtualization host (or any remote server).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hostname(String);

impl Hostname {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Hostname {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Hostname {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl FromStr for Hostname {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, DocDisplay)]
pub enum MachineNameError {
    /// machine name is empty
    Empty,
    /// machine name `{0}` is longer than 63 characters
    TooLong(String),
    /// machine name `{name}` contains invalid character `{character}`
    InvalidCharacter { name: String, character: char },
    /// machine name `{0}` must not start or end with a hyphen
    Hyphen(String),
}

/// The join key shared by the VM, its DHCP reservation and its DNS records.
///
/// Must be a valid DNS label: ASCII letters, digits and hyphens.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MachineName(String);

impl MachineName {
    pub fn new(name: impl Into<String>) -> Result<Self, MachineNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(MachineNameError::Empty);
        }
        if name.len() > 63 {
            return Err(MachineNameError::TooLong(name));
        }
        if let Some(character) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(MachineNameError::InvalidCharacter { name, character });
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(MachineNameError::Hyphen(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully-qualified form within `zone`, with the trailing root dot.
    pub fn fqdn(&self, zone: &str) -> String {
        format!("{}.{}.", self.0, zone.trim_end_matches('.'))
    }
}

impl Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MachineName {
    type Err = MachineNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for MachineName {
    type Error = MachineNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MachineName> for String {
    fn from(value: MachineName) -> Self {
        value.0
    }
}

impl AsRef<str> for MachineName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
