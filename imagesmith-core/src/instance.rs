//! Instance launch configuration and lifecycle states.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::disk::{BlockDevice, DEFAULT_DISK_TYPE};
use crate::error::CoreError;
use crate::image::Image;

/// Metadata key the guest agent runs at boot.
pub const STARTUP_SCRIPT_KEY: &str = "startup-script";

/// Lifecycle states an instance passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum InstanceState {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
}

impl InstanceState {
    /// The label the platform uses for this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Suspending => "SUSPENDING",
            Self::Suspended => "SUSPENDED",
            Self::Repairing => "REPAIRING",
            Self::Terminated => "TERMINATED",
        }
    }

    /// A state the instance cannot leave on its own; waiting for anything
    /// else is pointless once it is reached.
    #[must_use]
    pub const fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = CoreError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        Ok(match label {
            "PROVISIONING" => Self::Provisioning,
            "STAGING" => Self::Staging,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "STOPPED" => Self::Stopped,
            "SUSPENDING" => Self::Suspending,
            "SUSPENDED" => Self::Suspended,
            "REPAIRING" => Self::Repairing,
            "TERMINATED" => Self::Terminated,
            other => return Err(CoreError::InvalidInstanceState(other.to_owned())),
        })
    }
}

/// Everything needed to launch a build VM. Consumed by `run_instance`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceConfig {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    /// Image the boot disk is created from.
    pub source_image: Option<Image>,
    /// Boot disk name.
    pub disk_name: String,
    pub disk_size_gb: u64,
    pub disk_type: String,
    pub extra_block_devices: Vec<BlockDevice>,
    pub network: String,
    pub subnetwork: String,
    /// Host project for shared VPC networks.
    pub network_project_id: String,
    /// Static external address to assign, empty for ephemeral.
    pub address: String,
    pub omit_external_ip: bool,
    pub metadata: BTreeMap<String, String>,
    pub startup_script: Option<String>,
    pub service_account_email: String,
    pub scopes: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Network tags.
    pub tags: Vec<String>,
    pub preemptible: bool,
    pub secure_boot: bool,
}

impl InstanceConfig {
    /// Config with a 10 GiB standard boot disk named after the instance on
    /// the `default` network.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        zone: impl Into<String>,
        machine_type: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            disk_name: name.clone(),
            name,
            zone: zone.into(),
            machine_type: machine_type.into(),
            disk_size_gb: 10,
            disk_type: DEFAULT_DISK_TYPE.to_owned(),
            network: "default".to_owned(),
            ..Self::default()
        }
    }

    /// Check that the platform would accept this launch request.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingField`] for absent required fields and
    /// propagates extra block device validation errors.
    pub fn validate(&self) -> Result<(), CoreError> {
        let required = [
            ("name", &self.name),
            ("zone", &self.zone),
            ("machine_type", &self.machine_type),
            ("disk_name", &self.disk_name),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(CoreError::MissingField { field: *field });
        }
        if self.source_image.is_none() {
            return Err(CoreError::MissingField { field: "source_image" });
        }
        self.extra_block_devices.iter().try_for_each(BlockDevice::validate)
    }

    /// Instance metadata with the startup script folded in.
    #[must_use]
    pub fn effective_metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = self.metadata.clone();
        if let Some(script) = &self.startup_script {
            metadata.insert(STARTUP_SCRIPT_KEY.to_owned(), script.clone());
        }
        metadata
    }

    /// The boot disk request implied by this config.
    #[must_use]
    pub fn boot_device(&self) -> BlockDevice {
        BlockDevice {
            disk_name: self.disk_name.clone(),
            device_name: self.disk_name.clone(),
            zone: self.zone.clone(),
            disk_type: self.disk_type.clone(),
            size_gb: self.disk_size_gb,
            source_image: self
                .source_image
                .as_ref()
                .map(|image| image.self_link.clone())
                .unwrap_or_default(),
            ..BlockDevice::default()
        }
    }
}

/// Merge `updates` into `existing`: keys in `updates` overwrite, every other
/// key is preserved.
#[must_use]
pub fn merge_metadata(
    existing: &BTreeMap<String, String>,
    updates: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = existing.clone();
    merged.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
