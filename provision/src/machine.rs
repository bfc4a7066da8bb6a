use berth_compute::{DiskHandle, InstanceHandle};
use berth_dhcp::{AllowEntry, ReservationHandle};
use berth_dns::DnsRecord;
use berth_system::{HardwareAddress, Hostname, MachineName};
use serde::Serialize;
use std::net::Ipv4Addr;

/// Handles to everything provisioned for one machine. Unset fields were never created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MachineResources {
    pub instance: Option<InstanceHandle>,
    pub disk: Option<DiskHandle>,
    pub reservation: Option<ReservationHandle>,
    pub allow_entry: Option<AllowEntry>,
    pub a_record: Option<DnsRecord>,
    pub ptr_record: Option<DnsRecord>,
}

impl MachineResources {
    pub fn live_count(&self) -> usize {
        [
            self.instance.is_some(),
            self.disk.is_some(),
            self.reservation.is_some(),
            self.allow_entry.is_some(),
            self.a_record.is_some(),
            self.ptr_record.is_some(),
        ]
        .into_iter()
        .filter(|live| *live)
        .count()
    }
}

/// A machine and its presence across compute, DHCP and DNS, joined by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedMachine {
    pub name: MachineName,
    pub host: Hostname,
    pub storage_path: String,
    /// Set once the instance has been booted and stopped to generate it, then pinned.
    pub hardware_address: Option<HardwareAddress>,
    pub ip_address: Option<Ipv4Addr>,
    pub resources: MachineResources,
}

impl ManagedMachine {
    pub(crate) fn new(name: MachineName, host: Hostname, storage_path: String) -> Self {
        Self {
            name,
            host,
            storage_path,
            hardware_address: None,
            ip_address: None,
            resources: MachineResources::default(),
        }
    }

    /// Fully qualified name in `zone`, with the trailing root dot.
    pub fn fqdn(&self, zone: &str) -> String {
        self.name.fqdn(zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ManagedMachine {
        ManagedMachine::new(
            MachineName::new("web01").unwrap(),
            Hostname::new("hv1"),
            r"D:\Hyper-V\web01".to_owned(),
        )
    }

    #[test]
    fn fresh_machine_owns_nothing() {
        let machine = machine();
        assert_eq!(machine.resources.live_count(), 0);
        assert_eq!(machine.fqdn("lab.local."), "web01.lab.local.");
    }

    #[test]
    fn serializes_unset_resources_as_null() {
        let mut machine = machine();
        machine.ip_address = Some(Ipv4Addr::new(10, 0, 0, 25));
        machine.resources.instance = Some(InstanceHandle {
            host: Hostname::new("hv1"),
            name: MachineName::new("web01").unwrap(),
            id: "4f1c".to_owned(),
        });

        let json = serde_json::to_value(&machine).unwrap();
        assert_eq!(json["name"], "web01");
        assert_eq!(json["host"], "hv1");
        assert_eq!(json["ip_address"], "10.0.0.25");
        assert_eq!(json["hardware_address"], serde_json::Value::Null);
        assert_eq!(json["resources"]["instance"]["id"], "4f1c");
        assert_eq!(json["resources"]["a_record"], serde_json::Value::Null);
        assert_eq!(machine.resources.live_count(), 1);
    }
}
