use async_trait::async_trait;
use berth_cmd::{PowerShell, quote};
use berth_system::{HardwareAddress, Hostname, MachineName};
use std::net::Ipv4Addr;
use tracing::{debug, instrument};

use crate::{AddressReservationService, AllowEntry, DhcpError, ReservationHandle, ScopeId};

/// A Windows DHCP server managed through the DhcpServer PowerShell module.
#[derive(Debug, Clone)]
pub struct WindowsDhcp {
    program: String,
    server: Hostname,
}

impl WindowsDhcp {
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

    fn free_address_script(&self, scope: ScopeId) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "Get-DhcpServerv4FreeIPAddress -ComputerName {} -ScopeId {} -WarningAction SilentlyContinue | Select-Object -First 1",
            self.server(),
            quote(&scope.to_string())
        ));
        ps
    }

    fn create_reservation_script(
        &self,
        scope: ScopeId,
        address: Ipv4Addr,
        hardware_address: HardwareAddress,
        name: &MachineName,
    ) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "Add-DhcpServerv4Reservation -ComputerName {} -ScopeId {} -IPAddress {} -ClientId {} -Name {}",
            self.server(),
            quote(&scope.to_string()),
            quote(&address.to_string()),
            quote(&hardware_address.to_dashed()),
            quote(name.as_str())
        ));
        ps
    }

    fn remove_reservation_script(
        &self,
        scope: ScopeId,
        hardware_address: HardwareAddress,
    ) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "$reservation = Get-DhcpServerv4Reservation -ComputerName {} -ScopeId {} | Where-Object {{ $_.ClientId -eq {} }}",
            self.server(),
            quote(&scope.to_string()),
            quote(&hardware_address.to_dashed())
        ))
        .require(
            "$reservation",
            &format!("no reservation for {hardware_address} in scope {scope}"),
        )
        .line(format!(
            "$reservation | Remove-DhcpServerv4Reservation -ComputerName {}",
            self.server()
        ));
        ps
    }

    fn allow_script(&self, hardware_address: HardwareAddress, label: &str) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "Add-DhcpServerv4Filter -ComputerName {} -List Allow -MacAddress {} -Description {}",
            self.server(),
            quote(&hardware_address.to_dashed()),
            quote(label)
        ));
        ps
    }

    fn remove_allow_script(&self, hardware_address: HardwareAddress) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "$filter = Get-DhcpServerv4Filter -ComputerName {} -List Allow | Where-Object {{ $_.MacAddress -eq {} }}",
            self.server(),
            quote(&hardware_address.to_dashed())
        ))
        .require(
            "$filter",
            &format!("{hardware_address} is not on the allow-list"),
        )
        .line(format!(
            "Remove-DhcpServerv4Filter -ComputerName {} -MacAddress {}",
            self.server(),
            quote(&hardware_address.to_dashed())
        ));
        ps
    }

    fn list_scopes_script(&self) -> PowerShell {
        let mut ps = self.script();
        ps.line(format!(
            "ConvertTo-Json -Compress -InputObject @(Get-DhcpServerv4Scope -ComputerName {} | ForEach-Object {{ $_.ScopeId.IPAddressToString }})",
            self.server()
        ));
        ps
    }

    fn remote(&self, operation: &'static str) -> impl FnOnce(berth_cmd::PowerShellError) -> DhcpError {
        let server = self.server.clone();
        move |source| DhcpError::Remote {
            operation,
            server,
            source,
        }
    }
}

#[async_trait]
impl AddressReservationService for WindowsDhcp {
    #[instrument(skip(self), fields(server = %self.server))]
    async fn free_address(&self, scope: ScopeId) -> Result<Option<Ipv4Addr>, DhcpError> {
        let output = self
            .free_address_script(scope)
            .run()
            .await
            .map_err(self.remote("request free address"))?;
        if output.is_empty() {
            debug!("Scope has no free address");
            return Ok(None);
        }
        output
            .parse()
            .map(Some)
            .map_err(|_| DhcpError::InvalidAddress {
                server: self.server.clone(),
                output,
            })
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn create_reservation(
        &self,
        scope: ScopeId,
        address: Ipv4Addr,
        hardware_address: HardwareAddress,
        name: &MachineName,
    ) -> Result<ReservationHandle, DhcpError> {
        self.create_reservation_script(scope, address, hardware_address, name)
            .run()
            .await
            .map_err(self.remote("create reservation"))?;
        Ok(ReservationHandle {
            scope,
            address,
            hardware_address,
            name: name.clone(),
        })
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn remove_reservation(
        &self,
        scope: ScopeId,
        hardware_address: HardwareAddress,
    ) -> Result<(), DhcpError> {
        self.remove_reservation_script(scope, hardware_address)
            .run()
            .await
            .map(drop)
            .map_err(self.remote("remove reservation"))
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn allow_hardware_address(
        &self,
        hardware_address: HardwareAddress,
        label: &str,
    ) -> Result<AllowEntry, DhcpError> {
        self.allow_script(hardware_address, label)
            .run()
            .await
            .map_err(self.remote("add allow-list entry"))?;
        Ok(AllowEntry {
            hardware_address,
            label: label.to_owned(),
        })
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn remove_allow(&self, hardware_address: HardwareAddress) -> Result<(), DhcpError> {
        self.remove_allow_script(hardware_address)
            .run()
            .await
            .map(drop)
            .map_err(self.remote("remove allow-list entry"))
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn list_scopes(&self) -> Result<Vec<ScopeId>, DhcpError> {
        self.list_scopes_script()
            .run_json()
            .await
            .map_err(self.remote("list scopes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dhcp() -> WindowsDhcp {
        WindowsDhcp::new("pwsh", Hostname::new("dhcp1"))
    }

    fn mac() -> HardwareAddress {
        "00:15:5d:01:02:03".parse().unwrap()
    }

    fn scope() -> ScopeId {
        "10.0.0.0".parse().unwrap()
    }

    #[test]
    fn reservation_uses_dashed_client_id() {
        let name = MachineName::new("web01").unwrap();
        let body = dhcp()
            .create_reservation_script(scope(), Ipv4Addr::new(10, 0, 0, 25), mac(), &name)
            .body();
        assert_eq!(
            body,
            "Add-DhcpServerv4Reservation -ComputerName 'dhcp1' -ScopeId '10.0.0.0' -IPAddress '10.0.0.25' -ClientId '00-15-5d-01-02-03' -Name 'web01'"
        );
    }

    #[test]
    fn removal_matches_on_client_id_within_scope() {
        let body = dhcp().remove_reservation_script(scope(), mac()).body();
        assert!(body.contains("-ScopeId '10.0.0.0' | Where-Object { $_.ClientId -eq '00-15-5d-01-02-03' }"));
        assert!(body.contains("ItemNotFoundException"));
        assert!(body.ends_with("$reservation | Remove-DhcpServerv4Reservation -ComputerName 'dhcp1'"));
    }

    #[test]
    fn allow_list_is_labelled_with_name() {
        let body = dhcp().allow_script(mac(), "web01").body();
        assert!(body.contains("-List Allow -MacAddress '00-15-5d-01-02-03' -Description 'web01'"));
    }

    #[test]
    fn removing_allow_entry_requires_it() {
        let body = dhcp().remove_allow_script(mac()).body();
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("Remove-DhcpServerv4Filter"));
    }

    #[test]
    fn scopes_always_come_back_as_array() {
        let body = dhcp().list_scopes_script().body();
        assert!(body.starts_with("ConvertTo-Json -Compress -InputObject @("));
        let scopes: Vec<ScopeId> = serde_json::from_str(r#"["10.0.0.0","10.0.1.0"]"#).unwrap();
        assert_eq!(scopes, vec![scope(), "10.0.1.0".parse().unwrap()]);
    }
}
