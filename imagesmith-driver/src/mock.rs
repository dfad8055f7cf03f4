//! Recording, programmable [`Driver`] for tests.
//!
//! Every operation owns one record holding the arguments of its last call
//! and the overrides a test installed for it. Arguments are written before
//! any result is built; a later call overwrites them.
//!
//! Results come from the installed overrides, else from safe defaults: an
//! already-closed completion, a value derived from the recorded inputs, or
//! an empty/default query result. The mock never fails on its own.
//!
//! Override signals are moved out of their slot when handed back, so a
//! second call falls back to the default. Dispatch and query errors are
//! cloned and stay installed.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use imagesmith_core::{
    BlockDevice, CreateImageRequest, Disk, Image, ImageSelfLink, InstanceConfig, InstanceState,
    LoginProfile, PosixAccount, WindowsPasswordConfig,
};

use crate::{Completion, Driver, DriverError, PendingValue, ValueStream};

/// Project id given to default results when the test did not pick one.
pub const MOCK_PROJECT_ID: &str = "test";

/// Size of a default created image.
pub const MOCK_IMAGE_SIZE_GB: u64 = 10;

/// Password yielded by the default Windows password reset.
pub const MOCK_WINDOWS_PASSWORD: &str = "MOCK_PASSWORD";

/// Username of the primary POSIX account in the default login profile.
pub const MOCK_POSIX_USERNAME: &str = "testing_packer_io";

/// One operation's record. Locking recovers from poisoning so a panicking
/// test cannot hide the records from the next assertion.
#[derive(Debug, Default)]
pub struct Recorded<T>(Mutex<T>);

impl<T> Recorded<T> {
    /// Lock the record for reading or installing overrides.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Last [`Driver::create_image`] call and its overrides.
#[derive(Debug, Default)]
pub struct CreateImageRecord {
    /// Request of the last call.
    pub request: CreateImageRequest,
    /// Project id of the default image; [`MOCK_PROJECT_ID`] when empty.
    pub result_project_id: String,
    /// Self-link of the default image; derived from project and name when empty.
    pub result_self_link: String,
    /// Size of the default image; [`MOCK_IMAGE_SIZE_GB`] when zero.
    pub result_size_gb: u64,
    /// Value stream handed back once instead of the default image.
    pub values: Option<ValueStream<Image>>,
    /// Completion handed back once instead of a closed one.
    pub completion: Option<Completion>,
}

/// Last [`Driver::delete_image`] call.
#[derive(Debug, Default)]
pub struct DeleteImageRecord {
    pub project: String,
    pub name: String,
    /// Completion handed back once instead of a closed one.
    pub completion: Option<Completion>,
}

/// Last [`Driver::delete_instance`] call.
#[derive(Debug, Default)]
pub struct DeleteInstanceRecord {
    pub zone: String,
    pub name: String,
    /// Completion handed back once instead of a closed one.
    pub completion: Option<Completion>,
    /// Returned from every call while set; no signal is produced.
    pub dispatch_err: Option<DriverError>,
}

/// Last [`Driver::create_disk`] call.
#[derive(Debug, Default)]
pub struct CreateDiskRecord {
    /// Block device of the last call.
    pub device: BlockDevice,
    /// Value stream handed back once instead of the derived disk.
    pub values: Option<ValueStream<Disk>>,
    /// Completion handed back once instead of a closed one.
    pub completion: Option<Completion>,
}

/// Last [`Driver::delete_disk`] call.
#[derive(Debug, Default)]
pub struct DeleteDiskRecord {
    pub zone: String,
    pub name: String,
    /// Completion handed back once; wins over `err`.
    pub completion: Option<Completion>,
    /// Delivered through a fresh completion when no override signal is set.
    pub err: Option<DriverError>,
}

/// Last [`Driver::get_disk`] call.
#[derive(Debug, Default)]
pub struct GetDiskRecord {
    pub zone_or_region: String,
    pub name: String,
    /// Disk returned; a blank disk with the requested name when unset.
    pub result: Option<Disk>,
    /// Returned instead of `result` while set.
    pub err: Option<DriverError>,
}

/// Last [`Driver::get_image`] call.
#[derive(Debug, Default)]
pub struct GetImageRecord {
    pub name: String,
    pub from_family: bool,
    /// Image returned; one named after the request in [`MOCK_PROJECT_ID`] when unset.
    pub result: Option<Image>,
    /// Returned instead of `result` while set.
    pub err: Option<DriverError>,
}

/// Last [`Driver::get_image_from_project`] call.
#[derive(Debug, Default)]
pub struct GetImageFromProjectRecord {
    pub project: String,
    pub name: String,
    pub from_family: bool,
    /// Image returned; one in the requested project when unset.
    pub result: Option<Image>,
    /// Returned instead of `result` while set.
    pub err: Option<DriverError>,
}

/// Last [`Driver::get_image_from_projects`] call.
#[derive(Debug, Default)]
pub struct GetImageFromProjectsRecord {
    pub projects: Vec<String>,
    pub name: String,
    pub from_family: bool,
    /// Image returned; one in the first requested project when unset.
    pub result: Option<Image>,
    /// Returned instead of `result` while set.
    pub err: Option<DriverError>,
}

/// Last [`Driver::get_instance_metadata`] call.
#[derive(Debug, Default)]
pub struct GetInstanceMetadataRecord {
    pub zone: String,
    pub name: String,
    pub key: String,
    /// Value returned, empty by default.
    pub result: String,
    /// Returned instead of `result` while set.
    pub err: Option<DriverError>,
}

/// Record shared by the string-valued per-instance queries.
#[derive(Debug, Default)]
pub struct InstanceQueryRecord {
    pub zone: String,
    pub name: String,
    /// Value returned, empty by default.
    pub result: String,
    /// Returned instead of `result` while set.
    pub err: Option<DriverError>,
}

/// Last [`Driver::image_exists`] call.
#[derive(Debug, Default)]
pub struct ImageExistsRecord {
    pub project: String,
    pub name: String,
    /// Answer returned, `false` by default.
    pub result: bool,
}

/// Last [`Driver::run_instance`] call.
#[derive(Debug, Default)]
pub struct RunInstanceRecord {
    /// Config of the last call, `None` before any call.
    pub config: Option<InstanceConfig>,
    /// Completion handed back once instead of a closed one.
    pub completion: Option<Completion>,
    /// Returned from every call while set; no signal is produced.
    pub dispatch_err: Option<DriverError>,
}

/// Last [`Driver::wait_for_instance`] call.
#[derive(Debug, Default)]
pub struct WaitForInstanceRecord {
    /// Awaited state, `None` before any call.
    pub state: Option<InstanceState>,
    pub zone: String,
    pub name: String,
    /// Completion handed back once instead of a closed one.
    pub completion: Option<Completion>,
}

/// Last [`Driver::create_or_reset_windows_password`] call.
#[derive(Debug, Default)]
pub struct WindowsPasswordRecord {
    pub instance: String,
    pub zone: String,
    /// Config of the last call, `None` before any call.
    pub config: Option<WindowsPasswordConfig>,
    /// Value stream handed back once instead of [`MOCK_WINDOWS_PASSWORD`].
    pub values: Option<ValueStream<String>>,
    /// Completion handed back once instead of a closed one.
    pub completion: Option<Completion>,
    /// Returned from every call while set; no signal is produced.
    pub dispatch_err: Option<DriverError>,
}

/// Last [`Driver::import_os_login_ssh_key`] call.
#[derive(Debug, Default)]
pub struct ImportSshKeyRecord {
    pub user: String,
    pub key: String,
    /// Profile returned; one primary [`MOCK_POSIX_USERNAME`] account when unset.
    pub result: Option<LoginProfile>,
    /// Returned instead of `result` while set.
    pub err: Option<DriverError>,
}

/// Last [`Driver::delete_os_login_ssh_key`] call.
#[derive(Debug, Default)]
pub struct DeleteSshKeyRecord {
    pub user: String,
    pub fingerprint: String,
    /// Returned while set.
    pub err: Option<DriverError>,
}

/// Last [`Driver::add_to_instance_metadata`] call.
#[derive(Debug, Default)]
pub struct AddMetadataRecord {
    pub zone: String,
    pub name: String,
    /// Pairs of the last call, replaced wholesale on each call.
    pub metadata: BTreeMap<String, String>,
    /// Completion handed back once; wins over `err`.
    pub completion: Option<Completion>,
    /// Delivered through a fresh completion when no override signal is set.
    pub err: Option<DriverError>,
}

/// Calls to [`Driver::get_windows_password`].
#[derive(Debug, Default)]
pub struct GetWindowsPasswordRecord {
    /// Number of calls so far.
    pub calls: usize,
    /// Password returned, empty by default.
    pub result: String,
    /// Returned instead of `result` while set.
    pub err: Option<DriverError>,
}

/// A [`Driver`] that records its inputs and returns programmed results.
///
/// Records are locked individually to satisfy `Send + Sync`; driving one
/// mock from several threads at once still leaves only the last call's
/// arguments behind.
#[derive(Debug, Default)]
pub struct DriverMock {
    pub create_image: Recorded<CreateImageRecord>,
    pub delete_image: Recorded<DeleteImageRecord>,
    pub delete_instance: Recorded<DeleteInstanceRecord>,
    pub create_disk: Recorded<CreateDiskRecord>,
    pub delete_disk: Recorded<DeleteDiskRecord>,
    pub get_disk: Recorded<GetDiskRecord>,
    pub get_image: Recorded<GetImageRecord>,
    pub get_image_from_project: Recorded<GetImageFromProjectRecord>,
    pub get_image_from_projects: Recorded<GetImageFromProjectsRecord>,
    pub get_instance_metadata: Recorded<GetInstanceMetadataRecord>,
    pub get_nat_ip: Recorded<InstanceQueryRecord>,
    pub get_internal_ip: Recorded<InstanceQueryRecord>,
    pub get_serial_port_output: Recorded<InstanceQueryRecord>,
    pub image_exists: Recorded<ImageExistsRecord>,
    pub run_instance: Recorded<RunInstanceRecord>,
    pub wait_for_instance: Recorded<WaitForInstanceRecord>,
    pub windows_password: Recorded<WindowsPasswordRecord>,
    pub import_ssh_key: Recorded<ImportSshKeyRecord>,
    pub delete_ssh_key: Recorded<DeleteSshKeyRecord>,
    pub add_to_instance_metadata: Recorded<AddMetadataRecord>,
    pub get_windows_password: Recorded<GetWindowsPasswordRecord>,
}

impl DriverMock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn override_or_closed(slot: &mut Option<Completion>) -> Completion {
    slot.take().unwrap_or_else(Completion::succeeded)
}

fn query_result<T>(err: Option<&DriverError>, result: T) -> Result<T, DriverError> {
    match err {
        Some(err) => Err(err.clone()),
        None => Ok(result),
    }
}

fn instance_query(record: &Recorded<InstanceQueryRecord>, zone: &str, name: &str) -> Result<String, DriverError> {
    let mut rec = record.lock();
    rec.zone = zone.to_owned();
    rec.name = name.to_owned();
    query_result(rec.err.as_ref(), rec.result.clone())
}

#[async_trait]
impl Driver for DriverMock {
    fn create_image(&self, request: CreateImageRequest) -> PendingValue<Image> {
        tracing::debug!(project = %request.project, name = %request.name, "mock create_image");
        let mut rec = self.create_image.lock();
        rec.request = request;

        let values = rec.values.take().unwrap_or_else(|| {
            let project_id = if rec.result_project_id.is_empty() {
                MOCK_PROJECT_ID.to_owned()
            } else {
                rec.result_project_id.clone()
            };
            let self_link = if rec.result_self_link.is_empty() {
                ImageSelfLink::new(project_id.clone(), rec.request.name.clone()).to_string()
            } else {
                rec.result_self_link.clone()
            };
            let size_gb = if rec.result_size_gb == 0 { MOCK_IMAGE_SIZE_GB } else { rec.result_size_gb };
            ValueStream::ready(Image {
                project_id,
                name: rec.request.name.clone(),
                self_link,
                size_gb,
                labels: rec.request.labels.clone(),
                licenses: rec.request.licenses.clone(),
                guest_os_features: rec.request.guest_os_features(),
                ..Image::default()
            })
        });
        PendingValue::new(values, override_or_closed(&mut rec.completion))
    }

    fn delete_image(&self, project: &str, name: &str) -> Completion {
        tracing::debug!(%project, %name, "mock delete_image");
        let mut rec = self.delete_image.lock();
        rec.project = project.to_owned();
        rec.name = name.to_owned();
        override_or_closed(&mut rec.completion)
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<Completion, DriverError> {
        tracing::debug!(%zone, %name, "mock delete_instance");
        let mut rec = self.delete_instance.lock();
        rec.zone = zone.to_owned();
        rec.name = name.to_owned();
        if let Some(err) = &rec.dispatch_err {
            return Err(err.clone());
        }
        Ok(override_or_closed(&mut rec.completion))
    }

    fn create_disk(&self, device: BlockDevice) -> PendingValue<Disk> {
        tracing::debug!(disk = %device.disk_name, zone = %device.zone, "mock create_disk");
        let mut rec = self.create_disk.lock();
        rec.device = device;

        let values = rec.values.take().unwrap_or_else(|| {
            let mut disk = rec.device.to_disk();
            disk.self_link =
                Disk::self_link_for(MOCK_PROJECT_ID, &disk.zone, &disk.name, rec.device.is_regional());
            ValueStream::ready(disk)
        });
        PendingValue::new(values, override_or_closed(&mut rec.completion))
    }

    fn delete_disk(&self, zone: &str, name: &str) -> Completion {
        tracing::debug!(%zone, %name, "mock delete_disk");
        let mut rec = self.delete_disk.lock();
        rec.zone = zone.to_owned();
        rec.name = name.to_owned();
        match (rec.completion.take(), &rec.err) {
            (Some(completion), _) => completion,
            (None, Some(err)) => Completion::failed(err.clone()),
            (None, None) => Completion::succeeded(),
        }
    }

    async fn get_disk(&self, zone_or_region: &str, name: &str) -> Result<Disk, DriverError> {
        let mut rec = self.get_disk.lock();
        rec.zone_or_region = zone_or_region.to_owned();
        rec.name = name.to_owned();
        let disk = rec.result.clone().unwrap_or_else(|| Disk {
            name: name.to_owned(),
            zone: zone_or_region.to_owned(),
            ..Disk::default()
        });
        query_result(rec.err.as_ref(), disk)
    }

    async fn get_image(&self, name: &str, from_family: bool) -> Result<Image, DriverError> {
        let mut rec = self.get_image.lock();
        rec.name = name.to_owned();
        rec.from_family = from_family;
        let image = rec.result.clone().unwrap_or_else(|| Image::new(MOCK_PROJECT_ID, name));
        query_result(rec.err.as_ref(), image)
    }

    async fn get_image_from_project(
        &self,
        project: &str,
        name: &str,
        from_family: bool,
    ) -> Result<Image, DriverError> {
        let mut rec = self.get_image_from_project.lock();
        rec.project = project.to_owned();
        rec.name = name.to_owned();
        rec.from_family = from_family;
        let image = rec.result.clone().unwrap_or_else(|| Image::new(project, name));
        query_result(rec.err.as_ref(), image)
    }

    async fn get_image_from_projects(
        &self,
        projects: &[String],
        name: &str,
        from_family: bool,
    ) -> Result<Image, DriverError> {
        let mut rec = self.get_image_from_projects.lock();
        rec.projects = projects.to_vec();
        rec.name = name.to_owned();
        rec.from_family = from_family;
        let project = projects.first().map_or(MOCK_PROJECT_ID, String::as_str);
        let image = rec.result.clone().unwrap_or_else(|| Image::new(project, name));
        query_result(rec.err.as_ref(), image)
    }

    async fn get_instance_metadata(
        &self,
        zone: &str,
        name: &str,
        key: &str,
    ) -> Result<String, DriverError> {
        let mut rec = self.get_instance_metadata.lock();
        rec.zone = zone.to_owned();
        rec.name = name.to_owned();
        rec.key = key.to_owned();
        query_result(rec.err.as_ref(), rec.result.clone())
    }

    async fn get_nat_ip(&self, zone: &str, name: &str) -> Result<String, DriverError> {
        instance_query(&self.get_nat_ip, zone, name)
    }

    async fn get_internal_ip(&self, zone: &str, name: &str) -> Result<String, DriverError> {
        instance_query(&self.get_internal_ip, zone, name)
    }

    async fn get_serial_port_output(&self, zone: &str, name: &str) -> Result<String, DriverError> {
        instance_query(&self.get_serial_port_output, zone, name)
    }

    async fn image_exists(&self, project: &str, name: &str) -> bool {
        let mut rec = self.image_exists.lock();
        rec.project = project.to_owned();
        rec.name = name.to_owned();
        rec.result
    }

    async fn run_instance(&self, config: &InstanceConfig) -> Result<Completion, DriverError> {
        tracing::debug!(name = %config.name, zone = %config.zone, "mock run_instance");
        let mut rec = self.run_instance.lock();
        rec.config = Some(config.clone());
        if let Some(err) = &rec.dispatch_err {
            return Err(err.clone());
        }
        Ok(override_or_closed(&mut rec.completion))
    }

    fn wait_for_instance(&self, state: InstanceState, zone: &str, name: &str) -> Completion {
        tracing::debug!(%state, %zone, %name, "mock wait_for_instance");
        let mut rec = self.wait_for_instance.lock();
        rec.state = Some(state);
        rec.zone = zone.to_owned();
        rec.name = name.to_owned();
        override_or_closed(&mut rec.completion)
    }

    async fn create_or_reset_windows_password(
        &self,
        instance: &str,
        zone: &str,
        config: &WindowsPasswordConfig,
    ) -> Result<PendingValue<String>, DriverError> {
        tracing::debug!(%instance, %zone, user = %config.user_name, "mock create_or_reset_windows_password");
        let mut rec = self.windows_password.lock();
        rec.instance = instance.to_owned();
        rec.zone = zone.to_owned();
        rec.config = Some(config.clone());
        if let Some(err) = &rec.dispatch_err {
            return Err(err.clone());
        }
        let values = rec
            .values
            .take()
            .unwrap_or_else(|| ValueStream::ready(MOCK_WINDOWS_PASSWORD.to_owned()));
        Ok(PendingValue::new(values, override_or_closed(&mut rec.completion)))
    }

    async fn import_os_login_ssh_key(
        &self,
        user: &str,
        key: &str,
    ) -> Result<LoginProfile, DriverError> {
        let mut rec = self.import_ssh_key.lock();
        rec.user = user.to_owned();
        rec.key = key.to_owned();
        let profile = rec.result.clone().unwrap_or_else(|| LoginProfile {
            name: user.to_owned(),
            posix_accounts: vec![PosixAccount::primary(MOCK_POSIX_USERNAME)],
            ..LoginProfile::default()
        });
        query_result(rec.err.as_ref(), profile)
    }

    async fn delete_os_login_ssh_key(
        &self,
        user: &str,
        fingerprint: &str,
    ) -> Result<(), DriverError> {
        let mut rec = self.delete_ssh_key.lock();
        rec.user = user.to_owned();
        rec.fingerprint = fingerprint.to_owned();
        query_result(rec.err.as_ref(), ())
    }

    fn add_to_instance_metadata(
        &self,
        zone: &str,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Completion {
        tracing::debug!(%zone, %name, keys = metadata.len(), "mock add_to_instance_metadata");
        let mut rec = self.add_to_instance_metadata.lock();
        rec.zone = zone.to_owned();
        rec.name = name.to_owned();
        rec.metadata = metadata;
        match (rec.completion.take(), &rec.err) {
            (Some(completion), _) => completion,
            (None, Some(err)) => Completion::failed(err.clone()),
            (None, None) => Completion::succeeded(),
        }
    }

    fn get_windows_password(&self) -> Result<String, DriverError> {
        let mut rec = self.get_windows_password.lock();
        rec.calls += 1;
        query_result(rec.err.as_ref(), rec.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_completions_are_closed() {
        let mock = DriverMock::new();
        assert_eq!(mock.delete_image("p", "n").wait().await, Ok(()));
        assert_eq!(mock.delete_disk("z", "d").wait().await, Ok(()));
        assert_eq!(mock.wait_for_instance(InstanceState::Running, "z", "i").wait().await, Ok(()));
        assert_eq!(mock.add_to_instance_metadata("z", "i", BTreeMap::new()).wait().await, Ok(()));
    }

    #[tokio::test]
    async fn override_signal_is_used_once() {
        let mock = DriverMock::new();
        let installed = Completion::failed(DriverError::Transport("gone".to_owned()));
        let installed_id = installed.id();
        mock.delete_image.lock().completion = Some(installed);

        let first = mock.delete_image("p", "a");
        assert_eq!(first.id(), installed_id);
        assert!(first.wait().await.is_err());

        let second = mock.delete_image("p", "b");
        assert_ne!(second.id(), installed_id, "later calls fall back to a fresh signal");
        assert_eq!(second.wait().await, Ok(()));
        assert_eq!(mock.delete_image.lock().name, "b");
    }

    #[tokio::test]
    async fn delete_disk_err_fails_fresh_completion() {
        let mock = DriverMock::new();
        mock.delete_disk.lock().err = Some(DriverError::not_found(crate::ResourceKind::Disk, "d"));
        let result = mock.delete_disk("z", "d").wait().await;
        assert!(matches!(result, Err(DriverError::NotFound { .. })));
    }

    #[tokio::test]
    async fn create_disk_default_value_follows_device() {
        let mock = DriverMock::new();
        let pending = mock.create_disk(BlockDevice::new("scratch", "us-east1-b", 50));
        let disk = match pending.resolve().await {
            Ok(d) => d,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(disk.name, "scratch");
        assert_eq!(disk.size_gb, 50);
        assert!(disk.self_link.contains("/test/zones/us-east1-b/disks/scratch"));
        assert_eq!(mock.create_disk.lock().device.disk_name, "scratch");
    }

    #[tokio::test]
    async fn query_error_wins_over_result() {
        let mock = DriverMock::new();
        {
            let mut rec = mock.get_nat_ip.lock();
            rec.result = "34.1.2.3".to_owned();
            rec.err = Some(DriverError::Transport("timeout".to_owned()));
        }
        assert!(mock.get_nat_ip("z", "i").await.is_err());
        mock.get_nat_ip.lock().err = None;
        assert_eq!(mock.get_nat_ip("z", "i").await, Ok("34.1.2.3".to_owned()));
    }

    #[test]
    fn get_windows_password_defaults_to_empty() {
        let mock = DriverMock::new();
        assert_eq!(mock.get_windows_password(), Ok(String::new()));
        assert_eq!(mock.get_windows_password.lock().calls, 1);
    }
}
