use berth_compute::{Automation, MemorySpec, SecureBoot};
use berth_dhcp::ScopeId;
use berth_system::{CpuCount, DiskSize, Hostname, MachineName, MemorySize};
use displaydoc::Display;
use thiserror::Error;

pub const DEFAULT_SWITCH_NAME: &str = "Default Switch";

const MAX_CPU_COUNT: u16 = 64;
const MEMORY_ALIGNMENT: u64 = 2 * 1024 * 1024;
const MIN_MEMORY: MemorySize = MemorySize::from_mebibytes(32);
const MIN_DISK: DiskSize = DiskSize::from_gibibytes(1);

/// What to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSpec {
    pub name: MachineName,
    pub host: Hostname,
    /// DHCP scope the machine's address is reserved from.
    pub scope: ScopeId,
    pub cpu_count: CpuCount,
    pub memory: MemorySpec,
    pub disk_size: DiskSize,
    pub switch_name: String,
    pub boot_media: Option<String>,
    pub secure_boot: SecureBoot,
    pub automation: Automation,
    pub notes: Option<String>,
}

impl MachineSpec {
    pub fn new(name: MachineName, host: Hostname, scope: ScopeId) -> Self {
        Self {
            name,
            host,
            scope,
            cpu_count: CpuCount::default(),
            memory: MemorySpec::default(),
            disk_size: DiskSize::from_gibibytes(40),
            switch_name: DEFAULT_SWITCH_NAME.to_owned(),
            boot_media: None,
            secure_boot: SecureBoot::default(),
            automation: Automation::default(),
            notes: None,
        }
    }

    /// Check sizing before anything touches a remote system.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let cpus = self.cpu_count.get();
        if cpus == 0 || cpus > MAX_CPU_COUNT {
            return Err(ValidationError::CpuCount(cpus));
        }

        let memory = &self.memory;
        check_memory("startup", memory.startup)?;
        if memory.dynamic {
            check_memory("minimum", memory.minimum)?;
            check_memory("maximum", memory.maximum)?;
            if memory.minimum > memory.maximum {
                return Err(ValidationError::MemoryRange {
                    minimum: memory.minimum,
                    maximum: memory.maximum,
                });
            }
            if memory.startup < memory.minimum || memory.startup > memory.maximum {
                return Err(ValidationError::StartupOutsideRange {
                    startup: memory.startup,
                    minimum: memory.minimum,
                    maximum: memory.maximum,
                });
            }
        }

        if self.disk_size < MIN_DISK {
            return Err(ValidationError::DiskTooSmall(self.disk_size));
        }

        if self.switch_name.trim().is_empty() {
            return Err(ValidationError::SwitchName);
        }

        Ok(())
    }
}

fn check_memory(field: &'static str, size: MemorySize) -> Result<(), ValidationError> {
    if size < MIN_MEMORY {
        return Err(ValidationError::MemoryTooSmall { field, size });
    }
    if size.bytes() % MEMORY_ALIGNMENT != 0 {
        return Err(ValidationError::MemoryAlignment { field, size });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Display)]
pub enum ValidationError {
    /// cpu count must be between 1 and 64, got {0}
    CpuCount(u16),
    /// {field} memory {size} is below the 32MB floor
    MemoryTooSmall {
        field: &'static str,
        size: MemorySize,
    },
    /// {field} memory {size} is not a multiple of 2MB
    MemoryAlignment {
        field: &'static str,
        size: MemorySize,
    },
    /// minimum memory {minimum} exceeds maximum memory {maximum}
    MemoryRange {
        minimum: MemorySize,
        maximum: MemorySize,
    },
    /// startup memory {startup} is outside the dynamic range {minimum}..{maximum}
    StartupOutsideRange {
        startup: MemorySize,
        minimum: MemorySize,
        maximum: MemorySize,
    },
    /// disk size {0} is below 1GB
    DiskTooSmall(DiskSize),
    /// switch name is empty
    SwitchName,
    /// reverse zone cannot be derived: {0}
    ReverseZone(#[from] berth_dns::ReverseZoneError),
    /// scope {scope} is not covered by reverse zone {zone}
    OutsideReverseZone { scope: ScopeId, zone: String },
}
