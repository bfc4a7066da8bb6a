use async_trait::async_trait;
use berth_cmd::{PowerShell, PowerShellError, quote};
use berth_system::{DiskSize, HardwareAddress, Hostname, MachineName};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::{ComputeError, ComputeProvider, CreateInstance, DiskHandle, InstanceHandle};

const VM_RECORD: &str = "Select-Object @{n='Name';e={$_.VMName}}, @{n='Id';e={$_.VMId.ToString()}} | ConvertTo-Json -Compress";

#[derive(Debug, Deserialize)]
struct VmRecord {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Id")]
    id: String,
}

/// Hyper-V hosts managed through the Hyper-V PowerShell module.
#[derive(Debug, Clone)]
pub struct HyperV {
    program: String,
}

/// Hyper-V reports an unknown name as `InvalidArgument` with this message.
const VM_MISSING: &str = "unable to find a virtual machine";

fn get_vm(host: &Hostname, name: &MachineName) -> String {
    format!(
        "Get-VM -ComputerName {} -Name {}",
        quote(host.as_ref()),
        quote(name.as_str())
    )
}

impl HyperV {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn script(&self) -> PowerShell {
        PowerShell::new(&self.program)
    }

    /// Bind `$vm` to the instance or fail with `ObjectNotFound`.
    fn lookup(&self, instance: &InstanceHandle) -> PowerShell {
        let mut ps = self.script();
        ps.lookup(
            "vm",
            &get_vm(&instance.host, &instance.name),
            VM_MISSING,
        )
        .require(
            "$vm",
            &format!("no instance named {} on {}", instance.name, instance.host),
        );
        ps
    }

    fn find_script(&self, host: &Hostname, name: &MachineName) -> PowerShell {
        let mut ps = self.script();
        ps.lookup("vm", &get_vm(host, name), VM_MISSING)
            .line(format!("if ($vm) {{ $vm | {VM_RECORD} }}"));
        ps
    }

    fn create_script(&self, request: &CreateInstance) -> PowerShell {
        let host = quote(request.host.as_ref());
        let name = quote(request.name.as_str());
        let memory = &request.memory;
        let mut ps = self.script();

        ps.line(format!(
            "$vm = New-VM -ComputerName {host} -Name {name} -Path {} -Generation 2 -MemoryStartupBytes {} -NoVHD -SwitchName {}",
            quote(&request.storage_path),
            memory.startup.bytes(),
            quote(&request.switch_name)
        ))
        .line(format!(
            "Set-VMProcessor -VM $vm -Count {}",
            request.cpu_count
        ));

        if memory.dynamic {
            ps.line(format!(
                "Set-VMMemory -VM $vm -DynamicMemoryEnabled $true -StartupBytes {} -MinimumBytes {} -MaximumBytes {}",
                memory.startup.bytes(),
                memory.minimum.bytes(),
                memory.maximum.bytes()
            ));
        } else {
            ps.line(format!(
                "Set-VMMemory -VM $vm -DynamicMemoryEnabled $false -StartupBytes {}",
                memory.startup.bytes()
            ));
        }

        if request.secure_boot.enabled {
            ps.line(format!(
                "Set-VMFirmware -VM $vm -EnableSecureBoot On -SecureBootTemplate {}",
                quote(&request.secure_boot.template)
            ));
        } else {
            ps.line("Set-VMFirmware -VM $vm -EnableSecureBoot Off");
        }

        if let Some(media) = &request.boot_media {
            ps.line(format!(
                "$dvd = Add-VMDvdDrive -VM $vm -Path {} -Passthru",
                quote(media)
            ))
            .line("Set-VMFirmware -VM $vm -FirstBootDevice $dvd");
        }

        let automation = &request.automation;
        let mut set_vm = format!(
            "Set-VM -VM $vm -AutomaticStartAction {} -AutomaticStartDelay {} -AutomaticStopAction {}",
            automation.start_action,
            automation.start_delay.as_secs(),
            automation.stop_action
        );
        if let Some(notes) = &request.notes {
            set_vm.push_str(&format!(" -Notes {}", quote(notes)));
        }
        ps.line(set_vm).line(format!("$vm | {VM_RECORD}"));
        ps
    }

    fn attach_disk_script(
        &self,
        instance: &InstanceHandle,
        path: &str,
        size: DiskSize,
    ) -> PowerShell {
        let mut ps = self.lookup(instance);
        ps.line(format!(
            "New-VHD -ComputerName {} -Path {} -SizeBytes {} -Dynamic | Out-Null",
            quote(instance.host.as_ref()),
            quote(path),
            size.bytes()
        ))
        .line(format!("Add-VMHardDiskDrive -VM $vm -Path {}", quote(path)));
        ps
    }

    fn start_script(&self, instance: &InstanceHandle) -> PowerShell {
        let mut ps = self.lookup(instance);
        ps.line("Start-VM -VM $vm");
        ps
    }

    fn stop_hard_script(&self, instance: &InstanceHandle) -> PowerShell {
        let mut ps = self.lookup(instance);
        ps.line("if ($vm.State -ne 'Off') { Stop-VM -VM $vm -TurnOff -Force }");
        ps
    }

    fn hardware_address_script(&self, instance: &InstanceHandle) -> PowerShell {
        let mut ps = self.lookup(instance);
        ps.line("(Get-VMNetworkAdapter -VM $vm | Select-Object -First 1).MacAddress");
        ps
    }

    fn set_static_script(&self, instance: &InstanceHandle, address: HardwareAddress) -> PowerShell {
        let mut ps = self.lookup(instance);
        ps.line(format!(
            "Get-VMNetworkAdapter -VM $vm | Select-Object -First 1 | Set-VMNetworkAdapter -StaticMacAddress {}",
            quote(&address.to_bare_upper())
        ));
        ps
    }

    fn delete_script(&self, instance: &InstanceHandle) -> PowerShell {
        let mut ps = self.lookup(instance);
        ps.line("Remove-VM -VM $vm -Force");
        ps
    }

    async fn run(
        &self,
        operation: &'static str,
        host: &Hostname,
        script: PowerShell,
    ) -> Result<String, ComputeError> {
        script
            .run()
            .await
            .map_err(|source| remote(operation, host, source))
    }
}

fn remote(operation: &'static str, host: &Hostname, source: PowerShellError) -> ComputeError {
    ComputeError::Remote {
        operation,
        host: host.clone(),
        source,
    }
}

fn into_handle(host: &Hostname, record: VmRecord) -> Result<InstanceHandle, ComputeError> {
    let name = MachineName::new(record.name.clone()).map_err(|error| {
        remote(
            "read instance",
            host,
            PowerShellError::Failed {
                category: berth_cmd::ErrorCategory::Other,
                message: error.to_string(),
            },
        )
    })?;
    Ok(InstanceHandle {
        host: host.clone(),
        name,
        id: record.id,
    })
}

#[async_trait]
impl ComputeProvider for HyperV {
    #[instrument(skip(self))]
    async fn check_host(&self, host: &Hostname) -> Result<(), ComputeError> {
        let mut ps = self.script();
        ps.line(format!("Get-VMHost -ComputerName {} | Out-Null", quote(host.as_ref())));
        self.run("check host", host, ps).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn find_instance(
        &self,
        host: &Hostname,
        name: &MachineName,
    ) -> Result<Option<InstanceHandle>, ComputeError> {
        let output = self
            .run("find instance", host, self.find_script(host, name))
            .await?;
        if output.is_empty() {
            return Ok(None);
        }
        let record: VmRecord = serde_json::from_str(&output).map_err(|source| {
            remote("find instance", host, PowerShellError::Json { output, source })
        })?;
        into_handle(host, record).map(Some)
    }

    #[instrument(skip(self, request), fields(name = %request.name, host = %request.host))]
    async fn create_instance(
        &self,
        request: &CreateInstance,
    ) -> Result<InstanceHandle, ComputeError> {
        info!("Creating instance");
        let record: VmRecord = self
            .create_script(request)
            .run_json()
            .await
            .map_err(|source| remote("create instance", &request.host, source))?;
        let handle = into_handle(&request.host, record)?;
        debug!(id = %handle.id, "Instance created");
        Ok(handle)
    }

    #[instrument(skip(self, instance), fields(name = %instance.name))]
    async fn attach_disk(
        &self,
        instance: &InstanceHandle,
        path: &str,
        size: DiskSize,
    ) -> Result<DiskHandle, ComputeError> {
        self.run(
            "attach disk",
            &instance.host,
            self.attach_disk_script(instance, path, size),
        )
        .await?;
        Ok(DiskHandle {
            path: path.to_owned(),
            size,
        })
    }

    #[instrument(skip(self, instance), fields(name = %instance.name))]
    async fn start(&self, instance: &InstanceHandle) -> Result<(), ComputeError> {
        self.run("start instance", &instance.host, self.start_script(instance))
            .await
            .map(drop)
    }

    #[instrument(skip(self, instance), fields(name = %instance.name))]
    async fn stop_hard(&self, instance: &InstanceHandle) -> Result<(), ComputeError> {
        self.run("stop instance", &instance.host, self.stop_hard_script(instance))
            .await
            .map(drop)
    }

    #[instrument(skip(self, instance), fields(name = %instance.name))]
    async fn hardware_address(
        &self,
        instance: &InstanceHandle,
    ) -> Result<HardwareAddress, ComputeError> {
        let output = self
            .run(
                "read hardware address",
                &instance.host,
                self.hardware_address_script(instance),
            )
            .await?;
        output
            .parse()
            .map_err(|source| ComputeError::HardwareAddress {
                host: instance.host.clone(),
                source,
            })
    }

    #[instrument(skip(self, instance), fields(name = %instance.name))]
    async fn set_hardware_address_static(
        &self,
        instance: &InstanceHandle,
        address: HardwareAddress,
    ) -> Result<(), ComputeError> {
        self.run(
            "pin hardware address",
            &instance.host,
            self.set_static_script(instance, address),
        )
        .await
        .map(drop)
    }

    #[instrument(skip(self, instance), fields(name = %instance.name))]
    async fn delete_instance(&self, instance: &InstanceHandle) -> Result<(), ComputeError> {
        self.run("delete instance", &instance.host, self.delete_script(instance))
            .await
            .map(drop)
    }
}
