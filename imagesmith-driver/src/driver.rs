//! The compute driver contract.
//!
//! The build workflow talks to the platform only through [`Driver`], so a
//! live backend, the recording [`DriverMock`](crate::DriverMock) and the
//! [`InMemoryDriver`](crate::InMemoryDriver) are interchangeable.

use std::collections::BTreeMap;

use async_trait::async_trait;
use imagesmith_core::{
    BlockDevice, CreateImageRequest, Disk, Image, InstanceConfig, InstanceState, LoginProfile,
    WindowsPasswordConfig,
};

use crate::{Completion, DriverError, PendingValue};

/// Compute platform operations used by the image build workflow.
///
/// Operations come in three shapes:
/// - queries (`async fn` returning `Result`): one round trip, nothing left
///   running afterwards;
/// - completion-only and create operations (plain `fn`): return a signal
///   immediately, failures arrive through it;
/// - two-phase operations (`async fn` returning `Result<signal>`): the `Err`
///   is a dispatch error meaning nothing was started, otherwise the signal
///   carries the outcome.
///
/// Plain `fn` operations may spawn work onto the current Tokio runtime.
///
/// No ordering holds between operations; callers sequence dependent steps
/// by awaiting signals.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Capture an image from a source disk.
    ///
    /// The value stream yields the image once its identity is known; a
    /// request missing a required field fails through the completion.
    fn create_image(&self, request: CreateImageRequest) -> PendingValue<Image>;

    /// Delete an image.
    fn delete_image(&self, project: &str, name: &str) -> Completion;

    /// Delete an instance.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] if the instance does not exist.
    async fn delete_instance(&self, zone: &str, name: &str) -> Result<Completion, DriverError>;

    /// Create a disk from a block device configuration.
    fn create_disk(&self, device: BlockDevice) -> PendingValue<Disk>;

    /// Delete a disk.
    fn delete_disk(&self, zone: &str, name: &str) -> Completion;

    /// Look up a zonal or regional disk.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] or [`DriverError::Transport`].
    async fn get_disk(&self, zone_or_region: &str, name: &str) -> Result<Disk, DriverError>;

    /// Look up an image across the driver's search projects. With
    /// `from_family`, `name` is a family and the newest member is returned.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`], or [`DriverError::Ambiguous`] when
    /// a plain name matches in several projects.
    async fn get_image(&self, name: &str, from_family: bool) -> Result<Image, DriverError>;

    /// Look up an image in one project.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`].
    async fn get_image_from_project(
        &self,
        project: &str,
        name: &str,
        from_family: bool,
    ) -> Result<Image, DriverError>;

    /// Look up an image in the first of `projects` that has a match.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] if no project matches.
    async fn get_image_from_projects(
        &self,
        projects: &[String],
        name: &str,
        from_family: bool,
    ) -> Result<Image, DriverError>;

    /// Read one instance metadata value.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for a missing instance or key.
    async fn get_instance_metadata(
        &self,
        zone: &str,
        name: &str,
        key: &str,
    ) -> Result<String, DriverError>;

    /// External address, empty if none is assigned.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for a missing instance.
    async fn get_nat_ip(&self, zone: &str, name: &str) -> Result<String, DriverError>;

    /// Internal address, empty if none is assigned.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for a missing instance.
    async fn get_internal_ip(&self, zone: &str, name: &str) -> Result<String, DriverError>;

    /// Everything written to the instance's serial console so far.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for a missing instance.
    async fn get_serial_port_output(&self, zone: &str, name: &str) -> Result<String, DriverError>;

    /// Whether an image exists. Lookup failures of any kind read as `false`;
    /// use [`Driver::get_image_from_project`] to find out why.
    async fn image_exists(&self, project: &str, name: &str) -> bool;

    /// Launch an instance. The completion closes once it is `RUNNING`.
    ///
    /// # Errors
    /// Returns a dispatch error when the request is rejected.
    async fn run_instance(&self, config: &InstanceConfig) -> Result<Completion, DriverError>;

    /// Wait for an instance to reach `state`.
    fn wait_for_instance(&self, state: InstanceState, zone: &str, name: &str) -> Completion;

    /// Publish a password reset key and retrieve the new password, which
    /// the returned value stream yields before the completion closes.
    ///
    /// # Errors
    /// Returns a dispatch error when the instance cannot accept the key.
    async fn create_or_reset_windows_password(
        &self,
        instance: &str,
        zone: &str,
        config: &WindowsPasswordConfig,
    ) -> Result<PendingValue<String>, DriverError>;

    /// Attach a public key to a directory user.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for an unknown user and
    /// [`DriverError::InvalidRequest`] for a malformed key.
    async fn import_os_login_ssh_key(&self, user: &str, key: &str)
        -> Result<LoginProfile, DriverError>;

    /// Detach a public key from a directory user.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for an unknown user or fingerprint.
    async fn delete_os_login_ssh_key(&self, user: &str, fingerprint: &str)
        -> Result<(), DriverError>;

    /// Merge `metadata` into the instance's metadata: given keys overwrite,
    /// all others are kept.
    fn add_to_instance_metadata(
        &self,
        zone: &str,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Completion;

    /// The password retrieved by the last successful reset.
    ///
    /// # Errors
    /// Returns [`DriverError::PasswordNotRetrieved`] before any reset.
    fn get_windows_password(&self) -> Result<String, DriverError>;
}
