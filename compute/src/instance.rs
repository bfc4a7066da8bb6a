use berth_system::{CpuCount, DiskSize, Hostname, MachineName, MemorySize};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// A compute instance definition on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub host: Hostname,
    pub name: MachineName,
    /// Hypervisor-assigned identifier.
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskHandle {
    pub path: String,
    pub size: DiskSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySpec {
    pub startup: MemorySize,
    pub dynamic: bool,
    pub minimum: MemorySize,
    pub maximum: MemorySize,
}

impl Default for MemorySpec {
    fn default() -> Self {
        Self {
            startup: MemorySize::from_mebibytes(1024),
            dynamic: true,
            minimum: MemorySize::from_mebibytes(512),
            maximum: MemorySize::from_mebibytes(2048),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureBoot {
    pub enabled: bool,
    pub template: String,
}

impl Default for SecureBoot {
    fn default() -> Self {
        Self {
            enabled: true,
            template: "MicrosoftUEFICertificateAuthority".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutomaticStartAction {
    #[default]
    Nothing,
    StartIfRunning,
    Start,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutomaticStopAction {
    TurnOff,
    Save,
    #[default]
    ShutDown,
}

impl fmt::Display for AutomaticStartAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for AutomaticStopAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for AutomaticStartAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "nothing" => Ok(Self::Nothing),
            "startifrunning" => Ok(Self::StartIfRunning),
            "start" => Ok(Self::Start),
            _ => Err(format!(
                "unknown automatic start action `{s}` (expected Nothing, StartIfRunning or Start)"
            )),
        }
    }
}

impl FromStr for AutomaticStopAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "turnoff" => Ok(Self::TurnOff),
            "save" => Ok(Self::Save),
            "shutdown" => Ok(Self::ShutDown),
            _ => Err(format!(
                "unknown automatic stop action `{s}` (expected TurnOff, Save or ShutDown)"
            )),
        }
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Automation {
    pub start_action: AutomaticStartAction,
    #[serde(with = "seconds")]
    pub start_delay: Duration,
    pub stop_action: AutomaticStopAction,
}

impl Default for Automation {
    fn default() -> Self {
        Self {
            start_action: AutomaticStartAction::default(),
            start_delay: Duration::ZERO,
            stop_action: AutomaticStopAction::default(),
        }
    }
}

/// Everything needed to define an instance, before any disk is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstance {
    pub name: MachineName,
    pub host: Hostname,
    /// Directory on the host that holds the instance's files.
    pub storage_path: String,
    pub cpu_count: CpuCount,
    pub memory: MemorySpec,
    pub switch_name: String,
    /// Install media attached as a DVD drive and made the first boot device.
    pub boot_media: Option<String>,
    pub secure_boot: SecureBoot,
    pub automation: Automation,
    pub notes: Option<String>,
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
