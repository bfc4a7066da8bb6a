use berth_compute::ComputeError;
use berth_dhcp::{DhcpError, ScopeId};
use berth_dns::DnsError;
use berth_fs::FsError;
use berth_system::{Hostname, MachineName};
use displaydoc::Display;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::{DecommissionReport, ManagedMachine, ValidationError};

/// Coarse error classes for callers deciding what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum ErrorClass {
    /// validation error
    Validation,
    /// remote unavailable
    RemoteUnavailable,
    /// resource conflict
    ResourceConflict,
    /// step failure
    StepFailure,
    /// partial failure
    PartialFailure,
}

/// Provisioning steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum ProvisionStep {
    /// prepare storage
    PrepareStorage,
    /// create instance
    CreateInstance,
    /// attach disk
    AttachDisk,
    /// discover hardware address
    DiscoverHardwareAddress,
    /// request address
    RequestAddress,
    /// register DHCP
    RegisterDhcp,
    /// register DNS
    RegisterDns,
}

#[derive(Error, Debug)]
pub enum StepFailure {
    #[error("failed to prepare storage: {0}")]
    StoragePreparationFailed(#[source] FsError),

    #[error("failed to create instance: {0}")]
    InstanceCreationFailed(#[source] ComputeError),

    #[error("failed to attach disk: {0}")]
    DiskAttachFailed(#[source] ComputeError),

    #[error("failed to discover hardware address: {0}")]
    AddressDiscoveryFailed(#[source] ComputeError),

    #[error("no hardware address reported within {waited:?}")]
    AddressDiscoveryTimeout { waited: Duration },

    #[error("failed to request a free address: {0}")]
    AddressRequestFailed(#[source] DhcpError),

    #[error("scope {scope} has no free address")]
    NoFreeAddress { scope: ScopeId },

    #[error("failed to register with DHCP: {0}")]
    DhcpRegistrationFailed(#[source] DhcpError),

    #[error("failed to register with DNS: {0}")]
    DnsRegistrationFailed(#[source] DnsError),
}

impl StepFailure {
    pub fn is_unavailable(&self) -> bool {
        match self {
            StepFailure::StoragePreparationFailed(error) => error.is_unavailable(),
            StepFailure::InstanceCreationFailed(error)
            | StepFailure::DiskAttachFailed(error)
            | StepFailure::AddressDiscoveryFailed(error) => error.is_unavailable(),
            StepFailure::AddressRequestFailed(error)
            | StepFailure::DhcpRegistrationFailed(error) => error.is_unavailable(),
            StepFailure::DnsRegistrationFailed(error) => error.is_unavailable(),
            StepFailure::AddressDiscoveryTimeout { .. } | StepFailure::NoFreeAddress { .. } => {
                false
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("invalid machine spec: {0}")]
    Validation(#[from] ValidationError),

    #[error("host {host} is unreachable: {source}")]
    HostUnreachable {
        host: Hostname,
        #[source]
        source: ComputeError,
    },

    #[error("failed to look up {name} on {host}: {source}")]
    Lookup {
        name: MachineName,
        host: Hostname,
        #[source]
        source: ComputeError,
    },

    #[error("a machine named {name} already exists on {host}")]
    NameInUse { name: MachineName, host: Hostname },

    #[error("provisioning {} failed at step `{step}`: {failure}", .machine.name)]
    Step {
        step: ProvisionStep,
        #[source]
        failure: StepFailure,
        /// What was left in place when the step failed.
        machine: Box<ManagedMachine>,
        /// Cleanup report, when rollback was requested and the host answered.
        rollback: Option<Box<DecommissionReport>>,
    },
}

impl ProvisionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProvisionError::Validation(_) => ErrorClass::Validation,
            ProvisionError::HostUnreachable { .. } => ErrorClass::RemoteUnavailable,
            ProvisionError::Lookup { source, .. } if source.is_unavailable() => {
                ErrorClass::RemoteUnavailable
            }
            ProvisionError::Lookup { .. } => ErrorClass::StepFailure,
            ProvisionError::NameInUse { .. } => ErrorClass::ResourceConflict,
            ProvisionError::Step { failure, .. } if failure.is_unavailable() => {
                ErrorClass::RemoteUnavailable
            }
            ProvisionError::Step { .. } => ErrorClass::StepFailure,
        }
    }

    /// The failed step, for step failures.
    pub fn step(&self) -> Option<ProvisionStep> {
        match self {
            ProvisionError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The partially provisioned machine, for step failures.
    pub fn machine(&self) -> Option<&ManagedMachine> {
        match self {
            ProvisionError::Step { machine, .. } => Some(machine.as_ref()),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum DecommissionError {
    #[error("host {host} is unreachable: {source}")]
    HostUnreachable {
        host: Hostname,
        #[source]
        source: ComputeError,
    },

    #[error("decommissioning {} finished with failed steps", .0.name)]
    PartialFailure(DecommissionReport),
}

impl DecommissionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DecommissionError::HostUnreachable { .. } => ErrorClass::RemoteUnavailable,
            DecommissionError::PartialFailure(_) => ErrorClass::PartialFailure,
        }
    }

    pub fn report(&self) -> Option<&DecommissionReport> {
        match self {
            DecommissionError::PartialFailure(report) => Some(report),
            DecommissionError::HostUnreachable { .. } => None,
        }
    }
}
