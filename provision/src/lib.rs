//! Provisioning orchestrator: keeps a machine's compute instance, DHCP
//! reservation and DNS records consistent across creation and teardown.

mod discovery;
mod error;
mod machine;
mod orchestrator;
mod report;
mod spec;

#[cfg(test)]
mod fake;

pub use crate::discovery::{DiscoveryError, DiscoverySettings, discover_and_pin_hardware_address};
pub use crate::error::{
    DecommissionError, ErrorClass, ProvisionError, ProvisionStep, StepFailure,
};
pub use crate::machine::{MachineResources, ManagedMachine};
pub use crate::orchestrator::{Orchestrator, ProvisionOptions, ReverseZone, Settings};
pub use crate::report::{DecommissionReport, DecommissionStep, StepReport, StepStatus};
pub use crate::spec::{DEFAULT_SWITCH_NAME, MachineSpec, ValidationError};
