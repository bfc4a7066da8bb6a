use berth_compute::{ComputeError, ComputeProvider, CreateInstance, InstanceHandle};
use berth_dhcp::{AddressReservationService, DhcpError, ScopeId};
use berth_dns::{DnsError, NameService, ReverseZoneError, ptr_name, reverse_zone};
use berth_fs::{FsError, HostFilesystem};
use berth_system::{HardwareAddress, Hostname, MachineName};
use std::{fmt::Display, sync::Arc};
use tracing::{error, info, instrument, warn};

use crate::{
    DecommissionError, DecommissionReport, DecommissionStep, DiscoveryError, DiscoverySettings,
    MachineSpec, ManagedMachine, ProvisionError, ProvisionStep, StepFailure, StepStatus,
    ValidationError, discover_and_pin_hardware_address, report::Outcome,
};

/// Which reverse lookup zone holds a machine's PTR record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseZone {
    /// Always this zone.
    Fixed(String),
    /// Derived from the DHCP scope's network address with this prefix length.
    FromScope { prefix: u8 },
}

impl ReverseZone {
    pub fn for_scope(&self, scope: ScopeId) -> Result<String, ReverseZoneError> {
        match self {
            ReverseZone::Fixed(zone) => Ok(zone.clone()),
            ReverseZone::FromScope { prefix } => reverse_zone(scope.address(), *prefix),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory on the host under which each machine gets `<base_path>/<name>`.
    pub base_path: String,
    /// Forward lookup zone.
    pub zone: String,
    pub reverse_zone: ReverseZone,
    pub discovery: DiscoverySettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionOptions {
    /// On a step failure, tear down whatever was created before returning.
    pub rollback_on_failure: bool,
}

/// Sequences compute, DHCP and DNS so that they agree on a machine.
pub struct Orchestrator {
    compute: Arc<dyn ComputeProvider>,
    dhcp: Arc<dyn AddressReservationService>,
    dns: Arc<dyn NameService>,
    fs: Arc<dyn HostFilesystem>,
    settings: Settings,
}

type Failed = (ProvisionStep, StepFailure);

fn at<E>(
    step: ProvisionStep,
    failure: impl FnOnce(E) -> StepFailure,
) -> impl FnOnce(E) -> Failed {
    move |error| (step, failure(error))
}

impl Orchestrator {
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        dhcp: Arc<dyn AddressReservationService>,
        dns: Arc<dyn NameService>,
        fs: Arc<dyn HostFilesystem>,
        settings: Settings,
    ) -> Self {
        Self {
            compute,
            dhcp,
            dns,
            fs,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn storage_path(&self, name: &MachineName) -> String {
        berth_fs::join(&self.settings.base_path, name.as_str())
    }

    /// Create the instance, then its DHCP reservation, then its DNS records.
    ///
    /// Stops at the first failing step. Unless rollback was requested, what
    /// was created so far stays in place and is described by the error.
    #[instrument(skip_all, fields(name = %spec.name, host = %spec.host))]
    pub async fn provision(
        &self,
        spec: &MachineSpec,
        options: ProvisionOptions,
    ) -> Result<ManagedMachine, ProvisionError> {
        spec.validate()?;
        let reverse_zone = self
            .settings
            .reverse_zone
            .for_scope(spec.scope)
            .map_err(ValidationError::from)?;
        if ptr_name(spec.scope.address(), &reverse_zone).is_none() {
            return Err(ValidationError::OutsideReverseZone {
                scope: spec.scope,
                zone: reverse_zone,
            }
            .into());
        }

        self.compute
            .check_host(&spec.host)
            .await
            .map_err(|source| ProvisionError::HostUnreachable {
                host: spec.host.clone(),
                source,
            })?;

        match self.compute.find_instance(&spec.host, &spec.name).await {
            Ok(None) => {}
            Ok(Some(_)) => {
                return Err(ProvisionError::NameInUse {
                    name: spec.name.clone(),
                    host: spec.host.clone(),
                });
            }
            Err(source) => {
                return Err(ProvisionError::Lookup {
                    name: spec.name.clone(),
                    host: spec.host.clone(),
                    source,
                });
            }
        }

        let mut machine = ManagedMachine::new(
            spec.name.clone(),
            spec.host.clone(),
            self.storage_path(&spec.name),
        );

        match self.run_steps(spec, &reverse_zone, &mut machine).await {
            Ok(()) => {
                info!(
                    ip = ?machine.ip_address,
                    hardware_address = ?machine.hardware_address,
                    "Provisioned"
                );
                Ok(machine)
            }
            Err((step, failure)) => {
                error!(%step, %failure, "Provisioning failed");
                let rollback = if options.rollback_on_failure {
                    self.roll_back(&spec.name, &spec.host).await.map(Box::new)
                } else {
                    None
                };
                Err(ProvisionError::Step {
                    step,
                    failure,
                    machine: Box::new(machine),
                    rollback,
                })
            }
        }
    }

    async fn run_steps(
        &self,
        spec: &MachineSpec,
        reverse_zone: &str,
        machine: &mut ManagedMachine,
    ) -> Result<(), Failed> {
        info!(path = %machine.storage_path, "Preparing storage");
        self.fs
            .create_dir(&spec.host, &machine.storage_path)
            .await
            .map_err(at(ProvisionStep::PrepareStorage, StepFailure::StoragePreparationFailed))?;

        info!(switch = %spec.switch_name, "Creating instance");
        let request = CreateInstance {
            name: spec.name.clone(),
            host: spec.host.clone(),
            storage_path: machine.storage_path.clone(),
            cpu_count: spec.cpu_count,
            memory: spec.memory,
            switch_name: spec.switch_name.clone(),
            boot_media: spec.boot_media.clone(),
            secure_boot: spec.secure_boot.clone(),
            automation: spec.automation.clone(),
            notes: spec.notes.clone(),
        };
        let instance = self
            .compute
            .create_instance(&request)
            .await
            .map_err(at(ProvisionStep::CreateInstance, StepFailure::InstanceCreationFailed))?;
        machine.resources.instance = Some(instance.clone());

        let disk_path = berth_fs::join(&machine.storage_path, &format!("{}.vhdx", spec.name));
        info!(path = %disk_path, size = %spec.disk_size, "Attaching disk");
        let disk = self
            .compute
            .attach_disk(&instance, &disk_path, spec.disk_size)
            .await
            .map_err(at(ProvisionStep::AttachDisk, StepFailure::DiskAttachFailed))?;
        machine.resources.disk = Some(disk);

        info!("Discovering hardware address");
        let hardware_address = self
            .discover_and_pin_hardware_address(&instance)
            .await
            .map_err(at(ProvisionStep::DiscoverHardwareAddress, |error: DiscoveryError| match error {
                DiscoveryError::Compute(error) => StepFailure::AddressDiscoveryFailed(error),
                DiscoveryError::Timeout { waited } => {
                    StepFailure::AddressDiscoveryTimeout { waited }
                }
            }))?;
        machine.hardware_address = Some(hardware_address);

        info!(scope = %spec.scope, "Requesting address");
        let ip_address = self
            .dhcp
            .free_address(spec.scope)
            .await
            .map_err(at(ProvisionStep::RequestAddress, StepFailure::AddressRequestFailed))?
            .ok_or((ProvisionStep::RequestAddress, StepFailure::NoFreeAddress { scope: spec.scope }))?;
        machine.ip_address = Some(ip_address);

        info!(ip = %ip_address, %hardware_address, "Registering with DHCP");
        let reservation = self
            .dhcp
            .create_reservation(spec.scope, ip_address, hardware_address, &spec.name)
            .await
            .map_err(at(ProvisionStep::RegisterDhcp, StepFailure::DhcpRegistrationFailed))?;
        machine.resources.reservation = Some(reservation);
        let allow_entry = self
            .dhcp
            .allow_hardware_address(hardware_address, spec.name.as_str())
            .await
            .map_err(at(ProvisionStep::RegisterDhcp, StepFailure::DhcpRegistrationFailed))?;
        machine.resources.allow_entry = Some(allow_entry);

        let fqdn = machine.fqdn(&self.settings.zone);
        info!(%fqdn, %reverse_zone, "Registering with DNS");
        let a_record = self
            .dns
            .create_a_record(&self.settings.zone, &spec.name, ip_address)
            .await
            .map_err(at(ProvisionStep::RegisterDns, StepFailure::DnsRegistrationFailed))?;
        machine.resources.a_record = Some(a_record);
        let ptr_record = self
            .dns
            .create_ptr_record(reverse_zone, ip_address, &fqdn)
            .await
            .map_err(at(ProvisionStep::RegisterDns, StepFailure::DnsRegistrationFailed))?;
        machine.resources.ptr_record = Some(ptr_record);

        Ok(())
    }

    /// Boot once, hard-stop, wait for the generated address and pin it.
    pub async fn discover_and_pin_hardware_address(
        &self,
        instance: &InstanceHandle,
    ) -> Result<HardwareAddress, DiscoveryError> {
        discover_and_pin_hardware_address(
            self.compute.as_ref(),
            instance,
            &self.settings.discovery,
        )
        .await
    }

    async fn roll_back(&self, name: &MachineName, host: &Hostname) -> Option<DecommissionReport> {
        warn!("Rolling back partially provisioned machine");
        match self.decommission(name, host).await {
            Ok(report) => Some(report),
            Err(DecommissionError::PartialFailure(report)) => {
                warn!("Rollback left resources behind");
                Some(report)
            }
            Err(error) => {
                warn!(%error, "Rollback could not run");
                None
            }
        }
    }

    /// Remove everything belonging to `name`, continuing past failures.
    ///
    /// Resources that are already gone count as success, so running this
    /// twice is safe.
    #[instrument(skip_all, fields(%name, %host))]
    pub async fn decommission(
        &self,
        name: &MachineName,
        host: &Hostname,
    ) -> Result<DecommissionReport, DecommissionError> {
        self.compute
            .check_host(host)
            .await
            .map_err(|source| DecommissionError::HostUnreachable {
                host: host.clone(),
                source,
            })?;

        let mut report = DecommissionReport::new(name.clone(), host.clone());
        let instance = self.compute.find_instance(host, name).await;

        let mut outcome = Outcome::default();
        match &instance {
            Ok(Some(instance)) => {
                settle(&mut outcome, "power off", self.compute.stop_hard(instance).await)
            }
            Ok(None) => outcome.not_found(format!("no instance {name} on {host}")),
            Err(error) => outcome.failed(format!("look up instance: {error}")),
        }
        self.record(&mut report, DecommissionStep::StopInstance, outcome);

        let mut outcome = Outcome::default();
        let hardware_address = match &instance {
            Ok(Some(instance)) => match self.compute.hardware_address(instance).await {
                Ok(address) if !address.is_unassigned() => {
                    outcome.removed(format!("resolved {address}"));
                    Some(address)
                }
                Ok(_) => {
                    outcome.not_found("instance never generated a hardware address");
                    None
                }
                Err(error) if error.is_not_found() => {
                    outcome.not_found("instance is gone");
                    None
                }
                Err(error) => {
                    outcome.failed(format!("read hardware address: {error}"));
                    None
                }
            },
            Ok(None) => {
                outcome.not_found("instance is gone");
                None
            }
            Err(error) => {
                outcome.failed(format!("look up instance: {error}"));
                None
            }
        };
        self.record(&mut report, DecommissionStep::ResolveHardwareAddress, outcome);
        let resolve_failed = report
            .status(DecommissionStep::ResolveHardwareAddress)
            .is_some_and(StepStatus::is_failed);

        let outcome = self.remove_dns(name).await;
        self.record(&mut report, DecommissionStep::RemoveDns, outcome);

        let mut outcome = Outcome::default();
        match hardware_address {
            Some(address) => self.remove_dhcp(address, &mut outcome).await,
            None if resolve_failed => {
                outcome.failed("skipped, hardware address could not be resolved")
            }
            None => outcome.not_found("skipped, no hardware address"),
        }
        self.record(&mut report, DecommissionStep::RemoveDhcp, outcome);

        let mut outcome = Outcome::default();
        match &instance {
            Ok(Some(instance)) => settle(
                &mut outcome,
                format!("instance {}", instance.id),
                self.compute.delete_instance(instance).await,
            ),
            Ok(None) => outcome.not_found(format!("no instance {name} on {host}")),
            Err(error) => outcome.failed(format!("look up instance: {error}")),
        }
        self.record(&mut report, DecommissionStep::DeleteInstance, outcome);

        let path = self.storage_path(name);
        let mut outcome = Outcome::default();
        settle(
            &mut outcome,
            format!("directory {path}"),
            self.fs.remove_dir_all(host, &path).await,
        );
        self.record(&mut report, DecommissionStep::RemoveStorage, outcome);

        if report.has_failures() {
            warn!("Decommission finished with failures");
            Err(DecommissionError::PartialFailure(report))
        } else {
            info!("Decommissioned");
            Ok(report)
        }
    }

    fn record(&self, report: &mut DecommissionReport, step: DecommissionStep, outcome: Outcome) {
        report.record(step, outcome);
        if let Some(last) = report.steps.last() {
            match &last.status {
                StepStatus::Failed(message) => warn!(%step, %message, "Cleanup step failed"),
                status => info!(%step, %status, "Cleanup step done"),
            }
        }
    }

    async fn remove_dns(&self, name: &MachineName) -> Outcome {
        let mut outcome = Outcome::default();
        let zone = &self.settings.zone;
        let fqdn = name.fqdn(zone);

        match self.reverse_zones().await {
            Ok(reverse_zones) => {
                for reverse_zone in reverse_zones {
                    match self
                        .dns
                        .find_ptr_records_by_target(&reverse_zone, &fqdn)
                        .await
                    {
                        Ok(records) if records.is_empty() => {
                            outcome.not_found(format!("no PTR in {reverse_zone}"))
                        }
                        Ok(records) => {
                            for record in records {
                                let result = self.dns.remove_record(&record).await;
                                settle(&mut outcome, format!("PTR {record}"), result);
                            }
                        }
                        Err(error) if error.is_not_found() => {
                            outcome.not_found(format!("no zone {reverse_zone}"))
                        }
                        Err(error) => {
                            outcome.failed(format!("find PTR in {reverse_zone}: {error}"))
                        }
                    }
                }
            }
            Err(message) => outcome.failed(message),
        }

        let result = self.dns.remove_a_record(zone, name).await;
        settle(&mut outcome, format!("A {fqdn}"), result);

        outcome
    }

    async fn remove_dhcp(&self, address: HardwareAddress, outcome: &mut Outcome) {
        let result = self.dhcp.remove_allow(address).await;
        settle(outcome, format!("allow-list entry {address}"), result);

        // The reservation's scope is not recorded, so look in all of them.
        match self.dhcp.list_scopes().await {
            Ok(scopes) => {
                for scope in scopes {
                    let result = self.dhcp.remove_reservation(scope, address).await;
                    settle(outcome, format!("reservation in {scope}"), result);
                }
            }
            Err(error) => outcome.failed(format!("list scopes: {error}")),
        }
    }

    async fn reverse_zones(&self) -> Result<Vec<String>, String> {
        match &self.settings.reverse_zone {
            ReverseZone::Fixed(zone) => Ok(vec![zone.clone()]),
            ReverseZone::FromScope { prefix } => {
                let scopes = self
                    .dhcp
                    .list_scopes()
                    .await
                    .map_err(|error| format!("list scopes: {error}"))?;
                let mut zones = Vec::with_capacity(scopes.len());
                for scope in scopes {
                    let zone = reverse_zone(scope.address(), *prefix)
                        .map_err(|error| format!("reverse zone for {scope}: {error}"))?;
                    if !zones.contains(&zone) {
                        zones.push(zone);
                    }
                }
                Ok(zones)
            }
        }
    }
}

/// Errors from collaborators that can say the target was already gone.
trait RemoteError: Display {
    fn is_not_found(&self) -> bool;
}

impl RemoteError for ComputeError {
    fn is_not_found(&self) -> bool {
        ComputeError::is_not_found(self)
    }
}

impl RemoteError for DhcpError {
    fn is_not_found(&self) -> bool {
        DhcpError::is_not_found(self)
    }
}

impl RemoteError for DnsError {
    fn is_not_found(&self) -> bool {
        DnsError::is_not_found(self)
    }
}

impl RemoteError for FsError {
    fn is_not_found(&self) -> bool {
        FsError::is_not_found(self)
    }
}

fn settle<E: RemoteError>(outcome: &mut Outcome, what: impl Into<String>, result: Result<(), E>) {
    let what = what.into();
    match result {
        Ok(()) => outcome.removed(what),
        Err(error) if error.is_not_found() => outcome.not_found(format!("{what} not found")),
        Err(error) => outcome.failed(format!("{what}: {error}")),
    }
}
