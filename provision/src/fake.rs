//! In-memory compute, DHCP, DNS and filesystem for orchestrator tests.

use async_trait::async_trait;
use berth_cmd::{ErrorCategory, PowerShellError};
use berth_compute::{ComputeError, ComputeProvider, CreateInstance, DiskHandle, InstanceHandle};
use berth_dhcp::{AddressReservationService, AllowEntry, DhcpError, ReservationHandle, ScopeId};
use berth_dns::{DnsError, DnsRecord, NameService, RecordKind, ptr_name, same_name};
use berth_fs::{FsError, HostFilesystem};
use berth_system::{DiskSize, HardwareAddress, Hostname, MachineName};
use std::{
    collections::{BTreeMap, BTreeSet},
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{DiscoverySettings, Orchestrator, ReverseZone, Settings};

pub const ZONE: &str = "lab.local";

#[derive(Debug, Clone)]
pub struct FakeInstance {
    pub handle: InstanceHandle,
    pub running: bool,
    pub address: HardwareAddress,
    pub static_address: bool,
    pub disk: Option<DiskHandle>,
}

#[derive(Debug, Default)]
pub struct State {
    pub host_down: bool,
    /// Calls that fail with a generic remote error.
    pub failing: BTreeSet<&'static str>,
    /// Whether a boot/hard-stop cycle generates a hardware address at all.
    pub never_generate: bool,
    /// Polls that still see the placeholder after the address was generated.
    pub pending_polls: u32,
    next_id: u8,
    pub instances: BTreeMap<String, FakeInstance>,
    pub dirs: BTreeSet<String>,
    pub scopes: BTreeMap<ScopeId, Vec<Ipv4Addr>>,
    pub reservations: Vec<ReservationHandle>,
    pub allowed: Vec<AllowEntry>,
    pub records: Vec<DnsRecord>,
    /// Every state-changing call, in order.
    pub mutations: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Fake {
    state: Mutex<State>,
}

fn failure(category: ErrorCategory, message: impl Into<String>) -> PowerShellError {
    PowerShellError::Failed {
        category,
        message: message.into(),
    }
}

impl Fake {
    /// One scope, `10.0.0.0`, with addresses `.25` to `.27` free.
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.add_scope(scope().address(), 25..=27);
        Arc::new(fake)
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail(&self, operation: &'static str) {
        self.state().failing.insert(operation);
    }

    pub fn orchestrator(self: &Arc<Self>) -> Orchestrator {
        self.orchestrator_with(settings())
    }

    pub fn orchestrator_with(self: &Arc<Self>, settings: Settings) -> Orchestrator {
        Orchestrator::new(
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            settings,
        )
    }

    /// Add `network` with the given free host numbers.
    pub fn add_scope(&self, network: Ipv4Addr, free: impl IntoIterator<Item = u8>) -> ScopeId {
        let scope = ScopeId::new(network);
        let [a, b, c, _] = network.octets();
        self.state().scopes.insert(
            scope,
            free.into_iter().map(|host| Ipv4Addr::new(a, b, c, host)).collect(),
        );
        scope
    }

    /// Lock the state for `operation`, failing it if asked to.
    fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, PowerShellError> {
        let state = self.state();
        if state.host_down {
            return Err(failure(ErrorCategory::Unavailable, "WinRM cannot complete the operation"));
        }
        if state.failing.contains(operation) {
            return Err(failure(ErrorCategory::Other, format!("{operation}: access denied")));
        }
        Ok(state)
    }
}

pub fn scope() -> ScopeId {
    "10.0.0.0".parse().unwrap()
}

pub fn settings() -> Settings {
    Settings {
        base_path: r"D:\Hyper-V".to_owned(),
        zone: ZONE.to_owned(),
        reverse_zone: ReverseZone::FromScope { prefix: 24 },
        discovery: DiscoverySettings {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
        },
    }
}

fn compute(
    operation: &'static str,
    host: &Hostname,
) -> impl FnOnce(PowerShellError) -> ComputeError {
    let host = host.clone();
    move |source| ComputeError::Remote {
        operation,
        host,
        source,
    }
}

fn missing(instance: &InstanceHandle) -> ComputeError {
    ComputeError::NotFound {
        host: instance.host.clone(),
        name: instance.name.clone(),
    }
}

#[async_trait]
impl ComputeProvider for Fake {
    async fn check_host(&self, host: &Hostname) -> Result<(), ComputeError> {
        self.enter("check_host").map(drop).map_err(compute("check host", host))
    }

    async fn find_instance(
        &self,
        host: &Hostname,
        name: &MachineName,
    ) -> Result<Option<InstanceHandle>, ComputeError> {
        let state = self.enter("find_instance").map_err(compute("find instance", host))?;
        Ok(state
            .instances
            .get(name.as_str())
            .filter(|instance| &instance.handle.host == host)
            .map(|instance| instance.handle.clone()))
    }

    async fn create_instance(
        &self,
        request: &CreateInstance,
    ) -> Result<InstanceHandle, ComputeError> {
        let mut state = self
            .enter("create_instance")
            .map_err(compute("create instance", &request.host))?;
        state.next_id += 1;
        let handle = InstanceHandle {
            host: request.host.clone(),
            name: request.name.clone(),
            id: format!("vm-{}", state.next_id),
        };
        state.instances.insert(
            request.name.to_string(),
            FakeInstance {
                handle: handle.clone(),
                running: false,
                address: HardwareAddress::UNASSIGNED,
                static_address: false,
                disk: None,
            },
        );
        state.mutations.push(format!("create_instance {}", request.name));
        Ok(handle)
    }

    async fn attach_disk(
        &self,
        instance: &InstanceHandle,
        path: &str,
        size: DiskSize,
    ) -> Result<DiskHandle, ComputeError> {
        let mut state = self
            .enter("attach_disk")
            .map_err(compute("attach disk", &instance.host))?;
        let disk = DiskHandle {
            path: path.to_owned(),
            size,
        };
        let entry = state
            .instances
            .get_mut(instance.name.as_str())
            .ok_or_else(|| missing(instance))?;
        entry.disk = Some(disk.clone());
        state.mutations.push(format!("attach_disk {path}"));
        Ok(disk)
    }

    async fn start(&self, instance: &InstanceHandle) -> Result<(), ComputeError> {
        let mut state = self.enter("start").map_err(compute("start", &instance.host))?;
        let entry = state
            .instances
            .get_mut(instance.name.as_str())
            .ok_or_else(|| missing(instance))?;
        entry.running = true;
        state.mutations.push(format!("start {}", instance.name));
        Ok(())
    }

    async fn stop_hard(&self, instance: &InstanceHandle) -> Result<(), ComputeError> {
        let mut state = self.enter("stop_hard").map_err(compute("stop", &instance.host))?;
        let generate = !state.never_generate;
        let id = state.next_id;
        let entry = state
            .instances
            .get_mut(instance.name.as_str())
            .ok_or_else(|| missing(instance))?;
        let booted = entry.running;
        entry.running = false;
        if booted && generate && entry.address.is_unassigned() {
            entry.address = HardwareAddress::new([0x00, 0x15, 0x5d, 0x00, 0x00, id]);
        }
        state.mutations.push(format!("stop_hard {}", instance.name));
        Ok(())
    }

    async fn hardware_address(
        &self,
        instance: &InstanceHandle,
    ) -> Result<HardwareAddress, ComputeError> {
        let mut state = self
            .enter("hardware_address")
            .map_err(compute("read hardware address", &instance.host))?;
        let address = state
            .instances
            .get(instance.name.as_str())
            .map(|entry| entry.address)
            .ok_or_else(|| missing(instance))?;
        if !address.is_unassigned() && state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(HardwareAddress::UNASSIGNED);
        }
        Ok(address)
    }

    async fn set_hardware_address_static(
        &self,
        instance: &InstanceHandle,
        address: HardwareAddress,
    ) -> Result<(), ComputeError> {
        let mut state = self
            .enter("set_hardware_address_static")
            .map_err(compute("pin hardware address", &instance.host))?;
        let entry = state
            .instances
            .get_mut(instance.name.as_str())
            .ok_or_else(|| missing(instance))?;
        entry.address = address;
        entry.static_address = true;
        state.mutations.push(format!("set_static {address}"));
        Ok(())
    }

    async fn delete_instance(&self, instance: &InstanceHandle) -> Result<(), ComputeError> {
        let mut state = self
            .enter("delete_instance")
            .map_err(compute("delete instance", &instance.host))?;
        state
            .instances
            .remove(instance.name.as_str())
            .ok_or_else(|| missing(instance))?;
        state.mutations.push(format!("delete_instance {}", instance.name));
        Ok(())
    }
}

fn dhcp(operation: &'static str) -> impl FnOnce(PowerShellError) -> DhcpError {
    move |source| DhcpError::Remote {
        operation,
        server: Hostname::new("dhcp1"),
        source,
    }
}

fn dhcp_missing(operation: &'static str, message: String) -> DhcpError {
    dhcp(operation)(failure(ErrorCategory::NotFound, message))
}

#[async_trait]
impl AddressReservationService for Fake {
    async fn free_address(&self, scope: ScopeId) -> Result<Option<Ipv4Addr>, DhcpError> {
        let state = self.enter("free_address").map_err(dhcp("request free address"))?;
        Ok(state
            .scopes
            .get(&scope)
            .and_then(|free| free.first().copied()))
    }

    async fn create_reservation(
        &self,
        scope: ScopeId,
        address: Ipv4Addr,
        hardware_address: HardwareAddress,
        name: &MachineName,
    ) -> Result<ReservationHandle, DhcpError> {
        let mut state = self
            .enter("create_reservation")
            .map_err(dhcp("create reservation"))?;
        if let Some(free) = state.scopes.get_mut(&scope) {
            free.retain(|candidate| *candidate != address);
        }
        let reservation = ReservationHandle {
            scope,
            address,
            hardware_address,
            name: name.clone(),
        };
        state.reservations.push(reservation.clone());
        state
            .mutations
            .push(format!("create_reservation {address} {hardware_address}"));
        Ok(reservation)
    }

    async fn remove_reservation(
        &self,
        scope: ScopeId,
        hardware_address: HardwareAddress,
    ) -> Result<(), DhcpError> {
        let mut state = self
            .enter("remove_reservation")
            .map_err(dhcp("remove reservation"))?;
        let index = state
            .reservations
            .iter()
            .position(|r| r.scope == scope && r.hardware_address == hardware_address)
            .ok_or_else(|| {
                dhcp_missing(
                    "remove reservation",
                    format!("no reservation for {hardware_address} in {scope}"),
                )
            })?;
        let reservation = state.reservations.remove(index);
        if let Some(free) = state.scopes.get_mut(&scope) {
            free.push(reservation.address);
            free.sort();
        }
        state
            .mutations
            .push(format!("remove_reservation {scope} {hardware_address}"));
        Ok(())
    }

    async fn allow_hardware_address(
        &self,
        hardware_address: HardwareAddress,
        label: &str,
    ) -> Result<AllowEntry, DhcpError> {
        let mut state = self.enter("allow").map_err(dhcp("add allow-list entry"))?;
        let entry = AllowEntry {
            hardware_address,
            label: label.to_owned(),
        };
        state.allowed.push(entry.clone());
        state.mutations.push(format!("allow {hardware_address}"));
        Ok(entry)
    }

    async fn remove_allow(&self, hardware_address: HardwareAddress) -> Result<(), DhcpError> {
        let mut state = self
            .enter("remove_allow")
            .map_err(dhcp("remove allow-list entry"))?;
        let index = state
            .allowed
            .iter()
            .position(|entry| entry.hardware_address == hardware_address)
            .ok_or_else(|| {
                dhcp_missing(
                    "remove allow-list entry",
                    format!("{hardware_address} is not on the allow-list"),
                )
            })?;
        state.allowed.remove(index);
        state.mutations.push(format!("remove_allow {hardware_address}"));
        Ok(())
    }

    async fn list_scopes(&self) -> Result<Vec<ScopeId>, DhcpError> {
        let state = self.enter("list_scopes").map_err(dhcp("list scopes"))?;
        Ok(state.scopes.keys().copied().collect())
    }
}

fn dns(operation: &'static str) -> impl FnOnce(PowerShellError) -> DnsError {
    move |source| DnsError::Remote {
        operation,
        server: Hostname::new("dns1"),
        source,
    }
}

#[async_trait]
impl NameService for Fake {
    async fn create_a_record(
        &self,
        zone: &str,
        name: &MachineName,
        address: Ipv4Addr,
    ) -> Result<DnsRecord, DnsError> {
        let mut state = self.enter("create_a_record").map_err(dns("create A record"))?;
        let record = DnsRecord {
            zone: zone.to_owned(),
            name: name.to_string(),
            kind: RecordKind::A,
            data: address.to_string(),
        };
        state.records.push(record.clone());
        state.mutations.push(format!("create_a_record {name} {address}"));
        Ok(record)
    }

    async fn create_ptr_record(
        &self,
        reverse_zone: &str,
        address: Ipv4Addr,
        fqdn: &str,
    ) -> Result<DnsRecord, DnsError> {
        let mut state = self
            .enter("create_ptr_record")
            .map_err(dns("create PTR record"))?;
        let name = ptr_name(address, reverse_zone).ok_or_else(|| DnsError::OutsideZone {
            address,
            zone: reverse_zone.to_owned(),
        })?;
        let record = DnsRecord {
            zone: reverse_zone.to_owned(),
            name,
            kind: RecordKind::Ptr,
            data: fqdn.to_owned(),
        };
        state.records.push(record.clone());
        state.mutations.push(format!("create_ptr_record {address} {fqdn}"));
        Ok(record)
    }

    async fn remove_a_record(&self, zone: &str, name: &MachineName) -> Result<(), DnsError> {
        let mut state = self.enter("remove_a_record").map_err(dns("remove A record"))?;
        let before = state.records.len();
        state.records.retain(|record| {
            !(record.kind == RecordKind::A && record.zone == zone && record.name == name.as_str())
        });
        if state.records.len() == before {
            return Err(dns("remove A record")(failure(
                ErrorCategory::NotFound,
                format!("no A record for {name}"),
            )));
        }
        state.mutations.push(format!("remove_a_record {name}"));
        Ok(())
    }

    async fn find_ptr_records_by_target(
        &self,
        reverse_zone: &str,
        fqdn: &str,
    ) -> Result<Vec<DnsRecord>, DnsError> {
        let state = self.enter("find_ptr_records").map_err(dns("find PTR records"))?;
        Ok(state
            .records
            .iter()
            .filter(|record| {
                record.kind == RecordKind::Ptr
                    && record.zone == reverse_zone
                    && same_name(&record.data, fqdn)
            })
            .cloned()
            .collect())
    }

    async fn remove_record(&self, record: &DnsRecord) -> Result<(), DnsError> {
        let mut state = self.enter("remove_record").map_err(dns("remove record"))?;
        let index = state
            .records
            .iter()
            .position(|candidate| candidate == record)
            .ok_or_else(|| {
                dns("remove record")(failure(ErrorCategory::NotFound, format!("no record {record}")))
            })?;
        state.records.remove(index);
        state.mutations.push(format!("remove_record {record}"));
        Ok(())
    }
}

#[async_trait]
impl HostFilesystem for Fake {
    async fn create_dir(&self, host: &Hostname, path: &str) -> Result<(), FsError> {
        let mut state = self.enter("create_dir").map_err(|source| FsError::Remote {
            host: host.clone(),
            path: path.to_owned(),
            source,
        })?;
        state.dirs.insert(path.to_owned());
        state.mutations.push(format!("create_dir {path}"));
        Ok(())
    }

    async fn remove_dir_all(&self, host: &Hostname, path: &str) -> Result<(), FsError> {
        let remote = |source| FsError::Remote {
            host: host.clone(),
            path: path.to_owned(),
            source,
        };
        let mut state = self.enter("remove_dir_all").map_err(remote)?;
        if !state.dirs.remove(path) {
            return Err(remote(failure(
                ErrorCategory::NotFound,
                format!("{path} does not exist"),
            )));
        }
        state.mutations.push(format!("remove_dir_all {path}"));
        Ok(())
    }
}
