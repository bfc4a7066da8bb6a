//! Compute provider: virtual machine definitions on a virtualization host.

mod hyperv;
mod instance;

pub use crate::hyperv::HyperV;
pub use crate::instance::{
    AutomaticStartAction, AutomaticStopAction, Automation, CreateInstance, DiskHandle,
    InstanceHandle, MemorySpec, SecureBoot,
};

use async_trait::async_trait;
use berth_cmd::PowerShellError;
use berth_system::{DiskSize, HardwareAddress, HardwareAddressError, Hostname, MachineName};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("instance {name} not found on {host}")]
    NotFound { host: Hostname, name: MachineName },

    #[error("{operation} on {host} failed: {source}")]
    Remote {
        operation: &'static str,
        host: Hostname,
        #[source]
        source: PowerShellError,
    },

    #[error("{host} reported an invalid hardware address: {source}")]
    HardwareAddress {
        host: Hostname,
        #[source]
        source: HardwareAddressError,
    },
}

impl ComputeError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ComputeError::NotFound { .. } => true,
            ComputeError::Remote { source, .. } => source.is_not_found(),
            ComputeError::HardwareAddress { .. } => false,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        match self {
            ComputeError::Remote { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }
}

/// Creates, drives and destroys compute instances.
///
/// Operations addressing an instance that does not exist fail with an error
/// for which [`ComputeError::is_not_found`] holds.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Confirm the host answers management requests.
    async fn check_host(&self, host: &Hostname) -> Result<(), ComputeError>;

    async fn find_instance(
        &self,
        host: &Hostname,
        name: &MachineName,
    ) -> Result<Option<InstanceHandle>, ComputeError>;

    /// Define the instance with its network interface, firmware and media, but no disk.
    async fn create_instance(&self, request: &CreateInstance)
    -> Result<InstanceHandle, ComputeError>;

    async fn attach_disk(
        &self,
        instance: &InstanceHandle,
        path: &str,
        size: DiskSize,
    ) -> Result<DiskHandle, ComputeError>;

    async fn start(&self, instance: &InstanceHandle) -> Result<(), ComputeError>;

    /// Power off immediately, without a guest shutdown. Already stopped is fine.
    async fn stop_hard(&self, instance: &InstanceHandle) -> Result<(), ComputeError>;

    /// Current address of the instance's network interface, possibly
    /// [`HardwareAddress::UNASSIGNED`] before the first boot.
    async fn hardware_address(
        &self,
        instance: &InstanceHandle,
    ) -> Result<HardwareAddress, ComputeError>;

    async fn set_hardware_address_static(
        &self,
        instance: &InstanceHandle,
        address: HardwareAddress,
    ) -> Result<(), ComputeError>;

    async fn delete_instance(&self, instance: &InstanceHandle) -> Result<(), ComputeError>;
}
