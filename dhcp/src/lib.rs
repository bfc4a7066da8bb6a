//! Address reservation service: scopes, reservations and the allow-list filter.

mod windows;

pub use crate::windows::WindowsDhcp;

use async_trait::async_trait;
use berth_cmd::PowerShellError;
use berth_system::{HardwareAddress, Hostname, MachineName};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    net::{AddrParseError, Ipv4Addr},
    str::FromStr,
};
use thiserror::Error;

/// A DHCP scope, identified by its network address (`10.0.0.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(Ipv4Addr);

impl ScopeId {
    pub const fn new(address: Ipv4Addr) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Ipv4Addr {
        self.0
    }
}

impl Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ScopeId {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<Ipv4Addr> for ScopeId {
    fn from(value: Ipv4Addr) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationHandle {
    pub scope: ScopeId,
    pub address: Ipv4Addr,
    pub hardware_address: HardwareAddress,
    pub name: MachineName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowEntry {
    pub hardware_address: HardwareAddress,
    pub label: String,
}

#[derive(Error, Debug)]
pub enum DhcpError {
    #[error("{operation} on DHCP server {server} failed: {source}")]
    Remote {
        operation: &'static str,
        server: Hostname,
        #[source]
        source: PowerShellError,
    },

    #[error("DHCP server {server} returned an invalid address `{output}`")]
    InvalidAddress { server: Hostname, output: String },
}

impl DhcpError {
    pub fn is_not_found(&self) -> bool {
        match self {
            DhcpError::Remote { source, .. } => source.is_not_found(),
            DhcpError::InvalidAddress { .. } => false,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        match self {
            DhcpError::Remote { source, .. } => source.is_unavailable(),
            DhcpError::InvalidAddress { .. } => false,
        }
    }
}

/// Hands out addresses and binds them to hardware addresses.
///
/// Removal of something that does not exist fails with an error for which
/// [`DhcpError::is_not_found`] holds.
#[async_trait]
pub trait AddressReservationService: Send + Sync {
    /// A currently free address in `scope`, or `None` when the scope is exhausted.
    async fn free_address(&self, scope: ScopeId) -> Result<Option<Ipv4Addr>, DhcpError>;

    async fn create_reservation(
        &self,
        scope: ScopeId,
        address: Ipv4Addr,
        hardware_address: HardwareAddress,
        name: &MachineName,
    ) -> Result<ReservationHandle, DhcpError>;

    async fn remove_reservation(
        &self,
        scope: ScopeId,
        hardware_address: HardwareAddress,
    ) -> Result<(), DhcpError>;

    /// Add to the allow-list. Hardware addresses absent from it receive no lease.
    async fn allow_hardware_address(
        &self,
        hardware_address: HardwareAddress,
        label: &str,
    ) -> Result<AllowEntry, DhcpError>;

    async fn remove_allow(&self, hardware_address: HardwareAddress) -> Result<(), DhcpError>;

    async fn list_scopes(&self) -> Result<Vec<ScopeId>, DhcpError>;
}
