use berth_system::{Hostname, MachineName};
use displaydoc::Display;
use serde::Serialize;
use std::fmt;

/// Cleanup steps, in the order decommissioning runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum DecommissionStep {
    /// stop instance
    StopInstance,
    /// resolve hardware address
    ResolveHardwareAddress,
    /// remove DNS records
    RemoveDns,
    /// remove DHCP reservation
    RemoveDhcp,
    /// delete instance
    DeleteInstance,
    /// remove storage
    RemoveStorage,
}

impl DecommissionStep {
    pub const ALL: [DecommissionStep; 6] = [
        DecommissionStep::StopInstance,
        DecommissionStep::ResolveHardwareAddress,
        DecommissionStep::RemoveDns,
        DecommissionStep::RemoveDhcp,
        DecommissionStep::DeleteInstance,
        DecommissionStep::RemoveStorage,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Removed,
    NotFoundIgnored,
    Failed(String),
}

impl StepStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepStatus::Failed(_))
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Removed => f.write_str("removed"),
            StepStatus::NotFoundIgnored => f.write_str("not found"),
            StepStatus::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: DecommissionStep,
    pub status: StepStatus,
    /// What the step touched, for the operator.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecommissionReport {
    pub name: MachineName,
    pub host: Hostname,
    pub steps: Vec<StepReport>,
}

impl DecommissionReport {
    pub(crate) fn new(name: MachineName, host: Hostname) -> Self {
        Self {
            name,
            host,
            steps: Vec::with_capacity(DecommissionStep::ALL.len()),
        }
    }

    pub(crate) fn record(&mut self, step: DecommissionStep, outcome: Outcome) {
        self.steps.push(StepReport {
            step,
            status: outcome.status(),
            detail: (!outcome.details.is_empty()).then(|| outcome.details.join("; ")),
        });
    }

    pub fn status(&self, step: DecommissionStep) -> Option<&StepStatus> {
        self.steps
            .iter()
            .find(|report| report.step == step)
            .map(|report| &report.status)
    }

    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|report| report.status.is_failed())
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|report| report.status.is_failed())
    }
}

/// Accumulates the results of the individual calls that make up one step.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    removed: bool,
    failures: Vec<String>,
    details: Vec<String>,
}

impl Outcome {
    pub(crate) fn removed(&mut self, detail: impl Into<String>) {
        self.removed = true;
        self.details.push(detail.into());
    }

    pub(crate) fn not_found(&mut self, detail: impl Into<String>) {
        self.details.push(detail.into());
    }

    pub(crate) fn failed(&mut self, message: impl Into<String>) {
        self.failures.push(message.into());
    }

    fn status(&self) -> StepStatus {
        if !self.failures.is_empty() {
            StepStatus::Failed(self.failures.join("; "))
        } else if self.removed {
            StepStatus::Removed
        } else {
            StepStatus::NotFoundIgnored
        }
    }
}
