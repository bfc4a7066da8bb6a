use berth_compute::{AutomaticStartAction, AutomaticStopAction};
use berth_provision::{DEFAULT_SWITCH_NAME, DiscoverySettings, ReverseZone, Settings};
use berth_system::{DiskSize, Hostname, MemorySize};
use comfy_table::Table;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::read_to_string;

pub const CONFIG_FILE: &str = "berth.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    pub dhcp: DhcpConfig,
    pub dns: DnsConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Host used when a command gives no `--host`.
    pub default: Option<Hostname>,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Manage storage with local filesystem calls instead of remoting into the host.
    #[serde(default)]
    pub local: bool,
    #[serde(default = "default_program")]
    pub powershell: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            default: None,
            base_path: default_base_path(),
            local: false,
            powershell: default_program(),
        }
    }
}

fn default_base_path() -> String {
    r"C:\ProgramData\Microsoft\Windows\Virtual Hard Disks".to_owned()
}

fn default_program() -> String {
    "pwsh".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeConfig {
    #[serde(default = "default_switch_name")]
    pub switch_name: String,
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            switch_name: default_switch_name(),
            discovery: DiscoverySettings::default(),
        }
    }
}

fn default_switch_name() -> String {
    DEFAULT_SWITCH_NAME.to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DhcpConfig {
    pub server: Hostname,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    pub server: Hostname,
    pub zone: String,
    /// Fixed reverse zone. When unset it is derived from the scope.
    pub reverse_zone: Option<String>,
    #[serde(default = "default_reverse_prefix")]
    pub reverse_prefix: u8,
}

fn default_reverse_prefix() -> u8 {
    24
}

/// Machine sizing used where a command leaves it out.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    pub cpu_count: Option<u16>,
    pub startup_memory: Option<MemorySize>,
    pub dynamic_memory: Option<bool>,
    pub minimum_memory: Option<MemorySize>,
    pub maximum_memory: Option<MemorySize>,
    pub disk_size: Option<DiskSize>,
    pub automatic_start: Option<AutomaticStartAction>,
    pub automatic_start_delay: Option<u64>,
    pub automatic_stop: Option<AutomaticStopAction>,
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = if path.is_dir() {
            path.join(CONFIG_FILE)
        } else {
            path.to_owned()
        };
        let string = read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(&path, &string)
    }

    fn parse(path: &Path, string: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(string).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.path = path.to_owned();
        Ok(config)
    }

    pub fn settings(&self) -> Settings {
        let reverse_zone = match &self.dns.reverse_zone {
            Some(zone) => ReverseZone::Fixed(zone.clone()),
            None => ReverseZone::FromScope {
                prefix: self.dns.reverse_prefix,
            },
        };
        Settings {
            base_path: self.host.base_path.clone(),
            zone: self.dns.zone.clone(),
            reverse_zone,
            discovery: self.compute.discovery,
        }
    }

    pub fn print(&self) {
        let mut table = Table::new();
        table
            .load_preset(comfy_table::presets::UTF8_FULL)
            .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
            .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
            .set_header(vec!["setting", "value"]);

        let or_unset = |value: Option<String>| value.unwrap_or_else(|| "-".to_owned());
        let defaults = &self.defaults;
        let rows = [
            ("config", self.path.display().to_string()),
            ("host.default", or_unset(self.host.default.as_ref().map(ToString::to_string))),
            ("host.base_path", self.host.base_path.clone()),
            ("host.local", self.host.local.to_string()),
            ("host.powershell", self.host.powershell.clone()),
            ("compute.switch_name", self.compute.switch_name.clone()),
            (
                "compute.discovery.timeout",
                format!("{:?}", self.compute.discovery.timeout),
            ),
            (
                "compute.discovery.poll_interval",
                format!("{:?}", self.compute.discovery.poll_interval),
            ),
            ("dhcp.server", self.dhcp.server.to_string()),
            ("dns.server", self.dns.server.to_string()),
            ("dns.zone", self.dns.zone.clone()),
            ("dns.reverse_zone", or_unset(self.dns.reverse_zone.clone())),
            ("dns.reverse_prefix", self.dns.reverse_prefix.to_string()),
            ("defaults.cpu_count", or_unset(defaults.cpu_count.map(|n| n.to_string()))),
            (
                "defaults.startup_memory",
                or_unset(defaults.startup_memory.map(|m| m.to_string())),
            ),
            (
                "defaults.dynamic_memory",
                or_unset(defaults.dynamic_memory.map(|b| b.to_string())),
            ),
            (
                "defaults.minimum_memory",
                or_unset(defaults.minimum_memory.map(|m| m.to_string())),
            ),
            (
                "defaults.maximum_memory",
                or_unset(defaults.maximum_memory.map(|m| m.to_string())),
            ),
            ("defaults.disk_size", or_unset(defaults.disk_size.map(|d| d.to_string()))),
            (
                "defaults.automatic_start",
                or_unset(defaults.automatic_start.map(|a| a.to_string())),
            ),
            (
                "defaults.automatic_start_delay",
                or_unset(defaults.automatic_start_delay.map(|s| format!("{s}s"))),
            ),
            (
                "defaults.automatic_stop",
                or_unset(defaults.automatic_stop.map(|a| a.to_string())),
            ),
        ];
        for (key, value) in rows {
            table.add_row(vec![key.to_owned(), value]);
        }

        println!("{table}")
    }
}
