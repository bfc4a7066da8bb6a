use berth_compute::{ComputeError, ComputeProvider, InstanceHandle};
use berth_system::HardwareAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument};

/// Bounds on waiting for the hypervisor to generate a hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(with = "seconds")]
    pub timeout: Duration,
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("no hardware address after {waited:?}")]
    Timeout { waited: Duration },
}

/// Boot the instance once and power it off hard so the hypervisor generates a
/// hardware address, wait for it to show up, then pin it static.
#[instrument(skip(compute, instance), fields(instance = %instance.name))]
pub async fn discover_and_pin_hardware_address(
    compute: &dyn ComputeProvider,
    instance: &InstanceHandle,
    settings: &DiscoverySettings,
) -> Result<HardwareAddress, DiscoveryError> {
    compute.start(instance).await?;
    compute.stop_hard(instance).await?;

    let started = Instant::now();
    let address = loop {
        let address = compute.hardware_address(instance).await?;
        if !address.is_unassigned() {
            break address;
        }
        let waited = started.elapsed();
        if waited >= settings.timeout {
            return Err(DiscoveryError::Timeout { waited });
        }
        debug!(?waited, "Hardware address not generated yet");
        sleep(settings.poll_interval).await;
    };

    compute.set_hardware_address_static(instance, address).await?;
    info!(%address, "Pinned hardware address");

    Ok(address)
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
