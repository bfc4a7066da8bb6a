use async_trait::async_trait;
use berth_cmd::{PowerShell, PowerShellError, quote};
use berth_system::{Hostname, MachineName};
use serde::Deserialize;
use std::net::Ipv4Addr;
use tracing::{debug, instrument};

use crate::{DnsError, DnsRecord, NameService, RecordKind, ptr_name, same_name};

#[derive(Debug, Deserialize)]
struct PtrRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Target")]
    target: String,
}

/// A Windows DNS server managed through the DnsServer PowerShell module.
#[derive(Debug, Clone)]
pub struct WindowsDns {
    program: String,
    server: Hostname,
}

/// Error id of a lookup for a name the zone does not hold.
const RECORD_MISSING: &str = "WIN32 9714";

impl WindowsDns {
    pub fn new(program: impl Into<String>, server: Hostname) -> Self {
        Self {
            program: program.into(),
            server,
        }
    }

    fn script(&self) -> PowerShell {
        PowerShell::new(&self.program)
    }

    fn server(&self) -> String {
        quote(self.server.as_ref())
    }

    fn create_a_script(&self, zone: &str, name: &MachineName, address: Ipv4Addr) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "Add-DnsServerResourceRecordA -ComputerName {} -ZoneName {} -Name {} -IPv4Address {}",
            self.server(),
            quote(zone),
            quote(name.as_str()),
            quote(&address.to_string())
        ));
        ps
    }

    fn create_ptr_script(&self, reverse_zone: &str, name: &str, fqdn: &str) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "Add-DnsServerResourceRecordPtr -ComputerName {} -ZoneName {} -Name {} -PtrDomainName {}",
            self.server(),
            quote(reverse_zone),
            quote(name),
            quote(fqdn)
        ));
        ps
    }

    fn remove_a_script(&self, zone: &str, name: &MachineName) -> PowerShell {
        let mut ps = self.script();
        ps.lookup(
            "records",
            &format!(
                "Get-DnsServerResourceRecord -ComputerName {} -ZoneName {} -Name {} -RRType A",
                self.server(),
                quote(zone),
                quote(name.as_str())
            ),
            RECORD_MISSING,
        )
        .require("$records", &format!("no A record for {name} in {zone}"))
        .line(format!(
            "$records | Remove-DnsServerResourceRecord -ComputerName {} -ZoneName {} -Force",
            self.server(),
            quote(zone)
        ));
        ps
    }

    fn find_ptr_script(&self, reverse_zone: &str, fqdn: &str) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "$rows = Get-DnsServerResourceRecord -ComputerName {} -ZoneName {} -RRType Ptr | Where-Object {{ $_.RecordData.PtrDomainName -eq {} }} | ForEach-Object {{ [pscustomobject]@{{ Name = $_.HostName; Target = $_.RecordData.PtrDomainName }} }}",
            self.server(),
            quote(reverse_zone),
            quote(fqdn)
        ))
        .line("ConvertTo-Json -Compress -InputObject @($rows)");
        ps
    }

    fn remove_record_script(&self, record: &DnsRecord) -> PowerShell {
        let (rr_type, data_match) = match record.kind {
            RecordKind::A => (
                "A",
                format!(
                    "$_.RecordData.IPv4Address.IPAddressToString -eq {}",
                    quote(&record.data)
                ),
            ),
            RecordKind::Ptr => (
                "Ptr",
                format!("$_.RecordData.PtrDomainName -eq {}", quote(&record.data)),
            ),
        };
        let mut ps = self.script();
        ps.lookup(
            "candidates",
            &format!(
                "Get-DnsServerResourceRecord -ComputerName {} -ZoneName {} -Name {} -RRType {rr_type}",
                self.server(),
                quote(&record.zone),
                quote(&record.name)
            ),
            RECORD_MISSING,
        )
        .line(format!("$record = $candidates | Where-Object {{ {data_match} }}"))
        .require("$record", &format!("no record {record}"))
        .line(format!(
            "$record | Remove-DnsServerResourceRecord -ComputerName {} -ZoneName {} -Force",
            self.server(),
            quote(&record.zone)
        ));
        ps
    }

    fn remote(&self, operation: &'static str) -> impl FnOnce(PowerShellError) -> DnsError {
        let server = self.server.clone();
        move |source| DnsError::Remote {
            operation,
            server,
            source,
        }
    }
}

/// Keep only rows whose target really is `fqdn`, whatever the server-side filter did.
fn rows_to_records(reverse_zone: &str, fqdn: &str, rows: Vec<PtrRow>) -> Vec<DnsRecord> {
    rows.into_iter()
        .filter(|row| same_name(&row.target, fqdn))
        .map(|row| DnsRecord {
            zone: reverse_zone.to_owned(),
            name: row.name,
            kind: RecordKind::Ptr,
            data: row.target,
        })
        .collect()
}

#[async_trait]
impl NameService for WindowsDns {
    #[instrument(skip(self), fields(server = %self.server))]
    async fn create_a_record(
        &self,
        zone: &str,
        name: &MachineName,
        address: Ipv4Addr,
    ) -> Result<DnsRecord, DnsError> {
        self.create_a_script(zone, name, address)
            .run()
            .await
            .map_err(self.remote("create A record"))?;
        Ok(DnsRecord {
            zone: zone.to_owned(),
            name: name.to_string(),
            kind: RecordKind::A,
            data: address.to_string(),
        })
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn create_ptr_record(
        &self,
        reverse_zone: &str,
        address: Ipv4Addr,
        fqdn: &str,
    ) -> Result<DnsRecord, DnsError> {
        let name = ptr_name(address, reverse_zone).ok_or_else(|| DnsError::OutsideZone {
            address,
            zone: reverse_zone.to_owned(),
        })?;
        self.create_ptr_script(reverse_zone, &name, fqdn)
            .run()
            .await
            .map_err(self.remote("create PTR record"))?;
        Ok(DnsRecord {
            zone: reverse_zone.to_owned(),
            name,
            kind: RecordKind::Ptr,
            data: fqdn.to_owned(),
        })
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn remove_a_record(&self, zone: &str, name: &MachineName) -> Result<(), DnsError> {
        self.remove_a_script(zone, name)
            .run()
            .await
            .map(drop)
            .map_err(self.remote("remove A record"))
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn find_ptr_records_by_target(
        &self,
        reverse_zone: &str,
        fqdn: &str,
    ) -> Result<Vec<DnsRecord>, DnsError> {
        let rows: Vec<PtrRow> = self
            .find_ptr_script(reverse_zone, fqdn)
            .run_json()
            .await
            .map_err(self.remote("find PTR records"))?;
        let records = rows_to_records(reverse_zone, fqdn, rows);
        debug!(count = records.len(), "Found PTR records");
        Ok(records)
    }

    #[instrument(skip(self), fields(server = %self.server, record = %record))]
    async fn remove_record(&self, record: &DnsRecord) -> Result<(), DnsError> {
        self.remove_record_script(record)
            .run()
            .await
            .map(drop)
            .map_err(self.remote("remove record"))
    }
}
