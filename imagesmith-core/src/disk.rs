//! Persistent disks and the block-device configuration used to request them.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::image::{CustomerEncryptionKey, COMPUTE_API_BASE};

/// Disk type used when a block device does not name one.
pub const DEFAULT_DISK_TYPE: &str = "pd-standard";

/// A persistent disk as reported by the compute platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Disk {
    pub name: String,
    /// Zone for zonal disks, region for regional ones.
    pub zone: String,
    /// Image the disk was initialised from, empty for blank disks.
    pub source_image: String,
    pub size_gb: u64,
    #[serde(rename = "type")]
    pub disk_type: String,
    pub self_link: String,
}

impl Disk {
    /// Canonical URL of a disk, zonal or regional.
    #[must_use]
    pub fn self_link_for(project: &str, location: &str, name: &str, regional: bool) -> String {
        let scope = if regional { "regions" } else { "zones" };
        format!("{COMPUTE_API_BASE}/{project}/{scope}/{location}/disks/{name}")
    }
}

/// How a disk is exposed to the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterfaceType {
    #[default]
    Scsi,
    Nvme,
}

/// Access mode of an attached disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// Everything needed to request a disk. Consumed by `create_disk`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockDevice {
    pub disk_name: String,
    /// Name the guest sees; defaults to the disk name when empty.
    pub device_name: String,
    pub zone: String,
    /// Two zones of one region for a regional disk, empty otherwise.
    pub replica_zones: Vec<String>,
    pub disk_type: String,
    pub size_gb: u64,
    pub source_image: String,
    /// Existing disk to clone from.
    pub source_volume: String,
    pub interface_type: InterfaceType,
    pub attachment_mode: AttachmentMode,
    /// Keep the disk once the build is done.
    pub keep_device: bool,
    /// Capture an image from this disk at the end of the build.
    pub create_image: bool,
    pub encryption_key: Option<CustomerEncryptionKey>,
}

impl BlockDevice {
    /// A blank zonal disk of the given size.
    #[must_use]
    pub fn new(disk_name: impl Into<String>, zone: impl Into<String>, size_gb: u64) -> Self {
        Self {
            disk_name: disk_name.into(),
            zone: zone.into(),
            size_gb,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_regional(&self) -> bool {
        !self.replica_zones.is_empty()
    }

    /// Zone of a zonal disk, or the region its replica zones belong to.
    #[must_use]
    pub fn location(&self) -> String {
        if !self.is_regional() {
            return self.zone.clone();
        }
        self.replica_zones
            .first()
            .map(|zone| match zone.rsplit_once('-') {
                Some((region, _)) => region.to_owned(),
                None => zone.clone(),
            })
            .unwrap_or_default()
    }

    /// Disk type with the platform default applied.
    #[must_use]
    pub fn effective_disk_type(&self) -> &str {
        if self.disk_type.is_empty() {
            DEFAULT_DISK_TYPE
        } else {
            &self.disk_type
        }
    }

    /// Check that the platform would accept this configuration.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingField`] when the name or location is absent,
    /// and [`CoreError::InvalidBlockDevice`] for inconsistent settings.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.disk_name.is_empty() {
            return Err(CoreError::MissingField { field: "disk_name" });
        }
        if self.zone.is_empty() && self.replica_zones.is_empty() {
            return Err(CoreError::MissingField { field: "zone" });
        }
        if self.is_regional() && self.replica_zones.len() != 2 {
            return Err(self.invalid("regional disks need exactly two replica zones"));
        }
        if self.size_gb == 0 && self.source_image.is_empty() && self.source_volume.is_empty() {
            return Err(self.invalid("needs a size, a source image or a source volume"));
        }
        Ok(())
    }

    /// The disk this configuration describes, before the platform fills in
    /// a self-link.
    #[must_use]
    pub fn to_disk(&self) -> Disk {
        Disk {
            name: self.disk_name.clone(),
            zone: self.location(),
            source_image: self.source_image.clone(),
            size_gb: self.size_gb,
            disk_type: self.effective_disk_type().to_owned(),
            self_link: String::new(),
        }
    }

    fn invalid(&self, reason: &str) -> CoreError {
        CoreError::InvalidBlockDevice {
            disk: self.disk_name.clone(),
            reason: reason.to_owned(),
        }
    }
}
