mod config;
mod output;

use std::{env, path::PathBuf, sync::Arc, time::Duration};

use berth_compute::{AutomaticStartAction, AutomaticStopAction, HyperV};
use berth_dhcp::{ScopeId, WindowsDhcp};
use berth_dns::WindowsDns;
use berth_fs::{HostFilesystem, LocalFs, RemoteFs};
use berth_provision::{
    DecommissionError, MachineSpec, Orchestrator, ProvisionError, ProvisionOptions,
};
use berth_system::{CpuCount, DiskSize, Hostname, MachineName, MemorySize};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::output::{print_machine, print_report};

#[derive(Parser, Debug)]
#[command(name = "berth", version, about = "Provision virtual machines with DHCP and DNS")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long = "config", global = true)]
    pub config_path: Option<PathBuf>,

    #[arg(long = "log", global = true, default_value = "info")]
    pub log: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a machine with its DHCP reservation and DNS records
    Provision(ProvisionArgs),
    /// Remove a machine and everything registered for it
    Decommission {
        #[arg(long)]
        name: MachineName,

        /// Virtualization host. Defaults to `host.default` from the config.
        #[arg(long)]
        host: Option<Hostname>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
}

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Machine name, also used for the DHCP reservation and DNS records.
    #[arg(long)]
    pub name: MachineName,

    /// Virtualization host. Defaults to `host.default` from the config.
    #[arg(long)]
    pub host: Option<Hostname>,

    /// DHCP scope to reserve the address from, e.g. 10.0.0.0.
    #[arg(long)]
    pub scope: ScopeId,

    #[arg(long)]
    pub cpus: Option<u16>,

    /// Startup memory, e.g. 2GB.
    #[arg(long)]
    pub startup_memory: Option<MemorySize>,

    #[arg(long, conflicts_with = "static_memory")]
    pub dynamic_memory: bool,

    #[arg(long)]
    pub static_memory: bool,

    #[arg(long)]
    pub min_memory: Option<MemorySize>,

    #[arg(long)]
    pub max_memory: Option<MemorySize>,

    /// Disk size, e.g. 40GB.
    #[arg(long)]
    pub disk_size: Option<DiskSize>,

    /// Virtual switch for the network interface.
    #[arg(long = "switch")]
    pub switch_name: Option<String>,

    /// Install media (ISO path on the host).
    #[arg(long = "media")]
    pub boot_media: Option<String>,

    #[arg(long)]
    pub auto_start: Option<AutomaticStartAction>,

    /// Automatic start delay in seconds.
    #[arg(long)]
    pub auto_start_delay: Option<u64>,

    #[arg(long)]
    pub auto_stop: Option<AutomaticStopAction>,

    #[arg(long)]
    pub notes: Option<String>,

    /// Tear down whatever was created if a step fails.
    #[arg(long)]
    pub rollback_on_failure: bool,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no --host given and no host.default configured")]
    NoHost,

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Decommission(#[from] DecommissionError),

    #[error("failed to print machine: {0}")]
    Json(#[from] serde_json::Error),
}

pub async fn get_config(cli: &Cli) -> Result<Config, AppError> {
    let config_path = cli
        .config_path
        .clone()
        .or_else(|| env::var("BERTH_CONFIG").ok().map(PathBuf::from))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let config = Config::load(&config_path).await?;
    Ok(config)
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let config = get_config(&cli).await?;
    match cli.command {
        Command::Provision(args) => cmd_provision(config, args).await,
        Command::Decommission { name, host } => cmd_decommission(config, name, host).await,
        Command::Config { command } => match command {
            ConfigCommand::Show => cmd_config_show(config).await,
        },
    }
}

fn orchestrator(config: &Config) -> Orchestrator {
    let program = &config.host.powershell;
    let fs: Arc<dyn HostFilesystem> = if config.host.local {
        Arc::new(LocalFs)
    } else {
        Arc::new(RemoteFs::new(program))
    };
    Orchestrator::new(
        Arc::new(HyperV::new(program)),
        Arc::new(WindowsDhcp::new(program, config.dhcp.server.clone())),
        Arc::new(WindowsDns::new(program, config.dns.server.clone())),
        fs,
        config.settings(),
    )
}

fn resolve_host(config: &Config, host: Option<Hostname>) -> Result<Hostname, AppError> {
    host.or_else(|| config.host.default.clone())
        .ok_or(AppError::NoHost)
}

/// Flags first, then `[defaults]` from the config, then built-in defaults.
fn machine_spec(config: &Config, args: ProvisionArgs) -> Result<MachineSpec, AppError> {
    let host = resolve_host(config, args.host)?;
    let defaults = &config.defaults;
    let mut spec = MachineSpec::new(args.name, host, args.scope);

    if let Some(cpus) = args.cpus.or(defaults.cpu_count) {
        spec.cpu_count = CpuCount::new(cpus);
    }

    let memory = &mut spec.memory;
    if let Some(startup) = args.startup_memory.or(defaults.startup_memory) {
        memory.startup = startup;
    }
    if args.static_memory {
        memory.dynamic = false;
    } else if args.dynamic_memory {
        memory.dynamic = true;
    } else if let Some(dynamic) = defaults.dynamic_memory {
        memory.dynamic = dynamic;
    }
    if let Some(minimum) = args.min_memory.or(defaults.minimum_memory) {
        memory.minimum = minimum;
    }
    if let Some(maximum) = args.max_memory.or(defaults.maximum_memory) {
        memory.maximum = maximum;
    }

    if let Some(disk_size) = args.disk_size.or(defaults.disk_size) {
        spec.disk_size = disk_size;
    }
    spec.switch_name = args
        .switch_name
        .unwrap_or_else(|| config.compute.switch_name.clone());
    spec.boot_media = args.boot_media;
    spec.notes = args.notes;

    let automation = &mut spec.automation;
    if let Some(action) = args.auto_start.or(defaults.automatic_start) {
        automation.start_action = action;
    }
    if let Some(delay) = args.auto_start_delay.or(defaults.automatic_start_delay) {
        automation.start_delay = Duration::from_secs(delay);
    }
    if let Some(action) = args.auto_stop.or(defaults.automatic_stop) {
        automation.stop_action = action;
    }

    Ok(spec)
}

async fn cmd_provision(config: Config, args: ProvisionArgs) -> Result<(), AppError> {
    let options = ProvisionOptions {
        rollback_on_failure: args.rollback_on_failure,
    };
    let spec = machine_spec(&config, args)?;
    let orchestrator = orchestrator(&config);

    match orchestrator.provision(&spec, options).await {
        Ok(machine) => {
            print_machine(&machine)?;
            Ok(())
        }
        Err(error) => {
            if let ProvisionError::Step {
                machine, rollback, ..
            } = &error
            {
                match rollback {
                    Some(report) => print_report(report),
                    None => {
                        warn!("Partially provisioned machine left in place");
                        print_machine(machine)?;
                    }
                }
            }
            Err(error.into())
        }
    }
}

async fn cmd_decommission(
    config: Config,
    name: MachineName,
    host: Option<Hostname>,
) -> Result<(), AppError> {
    let host = resolve_host(&config, host)?;
    let orchestrator = orchestrator(&config);

    match orchestrator.decommission(&name, &host).await {
        Ok(report) => {
            print_report(&report);
            info!("Decommissioned {name}");
            Ok(())
        }
        Err(error) => {
            if let Some(report) = error.report() {
                print_report(report);
            }
            Err(error.into())
        }
    }
}

async fn cmd_config_show(config: Config) -> Result<(), AppError> {
    config.print();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        toml::from_str::<Config>(
            r#"
            [host]
            default = "hv1"

            [compute]
            switch_name = "External"

            [dhcp]
            server = "dhcp1"

            [dns]
            server = "dns1"
            zone = "lab.local"

            [defaults]
            cpu_count = 2
            dynamic_memory = false
            "#,
        )
        .unwrap()
    }

    fn args(extra: &[&str]) -> ProvisionArgs {
        let mut argv = vec!["berth", "provision", "--name", "web01", "--scope", "10.0.0.0"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Provision(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_defaults_fill_missing_flags() {
        let spec = machine_spec(&config(), args(&[])).unwrap();
        assert_eq!(spec.host, Hostname::new("hv1"));
        assert_eq!(spec.cpu_count, CpuCount::new(2));
        assert!(!spec.memory.dynamic);
        assert_eq!(spec.switch_name, "External");
        assert_eq!(spec.disk_size, DiskSize::from_gibibytes(40));
    }

    #[test]
    fn flags_override_config() {
        let spec = machine_spec(
            &config(),
            args(&[
                "--host",
                "hv2",
                "--cpus",
                "4",
                "--dynamic-memory",
                "--startup-memory",
                "2GB",
                "--max-memory",
                "4GB",
                "--disk-size",
                "80GB",
                "--switch",
                "Internal",
                "--auto-start",
                "start",
                "--auto-start-delay",
                "30",
                "--media",
                r"D:\iso\server.iso",
            ]),
        )
        .unwrap();
        assert_eq!(spec.host, Hostname::new("hv2"));
        assert_eq!(spec.cpu_count, CpuCount::new(4));
        assert!(spec.memory.dynamic);
        assert_eq!(spec.memory.startup, MemorySize::from_mebibytes(2048));
        assert_eq!(spec.memory.maximum, MemorySize::from_mebibytes(4096));
        assert_eq!(spec.disk_size, DiskSize::from_gibibytes(80));
        assert_eq!(spec.switch_name, "Internal");
        assert_eq!(spec.automation.start_action, AutomaticStartAction::Start);
        assert_eq!(spec.automation.start_delay, Duration::from_secs(30));
        assert_eq!(spec.boot_media.as_deref(), Some(r"D:\iso\server.iso"));
        assert_eq!(spec.validate(), Ok(()));
    }

    #[test]
    fn host_is_required_somewhere() {
        let mut config = config();
        config.host.default = None;
        assert!(matches!(
            machine_spec(&config, args(&[])),
            Err(AppError::NoHost)
        ));
    }

    #[test]
    fn memory_flags_conflict() {
        let result = Cli::try_parse_from([
            "berth",
            "provision",
            "--name",
            "web01",
            "--scope",
            "10.0.0.0",
            "--dynamic-memory",
            "--static-memory",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_name_is_rejected_by_parser() {
        let result = Cli::try_parse_from([
            "berth",
            "decommission",
            "--name",
            "web_01",
            "--host",
            "hv1",
        ]);
        assert!(result.is_err());
    }
}
