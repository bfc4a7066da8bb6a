//! Name service: forward (A) and reverse (PTR) records.

mod reverse;
mod windows;

pub use crate::reverse::{ReverseZoneError, ptr_name, reverse_zone, same_name};
pub use crate::windows::WindowsDns;

use async_trait::async_trait;
use berth_cmd::PowerShellError;
use berth_system::{Hostname, MachineName};
use serde::{Deserialize, Serialize};
use std::{fmt, net::Ipv4Addr};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    A,
    Ptr,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::A => f.write_str("A"),
            RecordKind::Ptr => f.write_str("PTR"),
        }
    }
}

/// A single resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub zone: String,
    /// Owner name relative to `zone`.
    pub name: String,
    pub kind: RecordKind,
    /// Address for A records, target FQDN for PTR records.
    pub data: String,
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {} {}", self.name, self.zone, self.kind, self.data)
    }
}

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("{operation} on DNS server {server} failed: {source}")]
    Remote {
        operation: &'static str,
        server: Hostname,
        #[source]
        source: PowerShellError,
    },

    #[error("address {address} is outside reverse zone {zone}")]
    OutsideZone { address: Ipv4Addr, zone: String },
}

impl DnsError {
    pub fn is_not_found(&self) -> bool {
        match self {
            DnsError::Remote { source, .. } => source.is_not_found(),
            DnsError::OutsideZone { .. } => false,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        match self {
            DnsError::Remote { source, .. } => source.is_unavailable(),
            DnsError::OutsideZone { .. } => false,
        }
    }
}

/// Creates and removes name records.
///
/// Removal of something that does not exist fails with an error for which
/// [`DnsError::is_not_found`] holds.
#[async_trait]
pub trait NameService: Send + Sync {
    async fn create_a_record(
        &self,
        zone: &str,
        name: &MachineName,
        address: Ipv4Addr,
    ) -> Result<DnsRecord, DnsError>;

    async fn create_ptr_record(
        &self,
        reverse_zone: &str,
        address: Ipv4Addr,
        fqdn: &str,
    ) -> Result<DnsRecord, DnsError>;

    /// Remove every A record owned by `name`.
    async fn remove_a_record(&self, zone: &str, name: &MachineName) -> Result<(), DnsError>;

    /// PTR records are keyed by address, so lookup by name goes through their target.
    async fn find_ptr_records_by_target(
        &self,
        reverse_zone: &str,
        fqdn: &str,
    ) -> Result<Vec<DnsRecord>, DnsError>;

    async fn remove_record(&self, record: &DnsRecord) -> Result<(), DnsError>;
}
