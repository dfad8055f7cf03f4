//! In-memory [`Driver`] with real resource semantics.
//!
//! Images, disks, instances and login profiles live in a shared registry, so
//! lookups fail the way the platform does: missing resources are not found,
//! duplicate names are rejected, a plain image name found in several search
//! projects is ambiguous. Operations finish immediately, except
//! [`Driver::wait_for_instance`], which polls the registry from a Tokio task
//! until the state is reached or the configured timeout passes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use sha2::{Digest, Sha256};

use imagesmith_core::{
    merge_metadata, posix_username_for, BlockDevice, CreateImageRequest, Disk, Image,
    ImageSelfLink, InstanceConfig, InstanceState, LoginProfile, PosixAccount, SshPublicKey,
    WindowsPasswordConfig, WINDOWS_KEYS_METADATA_KEY,
};

use crate::{Completion, Driver, DriverConfig, DriverError, PendingValue, ResourceKind};

/// First uid handed to registered login users.
const FIRST_LOGIN_UID: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct FakeInstance {
    state: InstanceState,
    metadata: BTreeMap<String, String>,
    nat_ip: String,
    internal_ip: String,
    serial_output: String,
    disks: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    /// Images per project, oldest first.
    images: BTreeMap<String, Vec<Image>>,
    /// Disks by `(zone or region, name)`.
    disks: BTreeMap<(String, String), Disk>,
    /// Instances by `(zone, name)`.
    instances: BTreeMap<(String, String), FakeInstance>,
    login_profiles: BTreeMap<String, LoginProfile>,
    windows_password: Option<String>,
    addresses_assigned: u32,
    /// Uid handed to the next newly registered login user.
    next_uid: u64,
}

impl FakeState {
    fn find_image(&self, project: &str, name: &str, from_family: bool) -> Option<&Image> {
        let images = self.images.get(project)?;
        if from_family {
            images.iter().rev().find(|image| image.family == name)
        } else {
            images.iter().find(|image| image.name == name)
        }
    }

    fn instance(&self, zone: &str, name: &str) -> Result<&FakeInstance, DriverError> {
        self.instances
            .get(&key(zone, name))
            .ok_or_else(|| DriverError::not_found(ResourceKind::Instance, name))
    }

    fn instance_mut(&mut self, zone: &str, name: &str) -> Result<&mut FakeInstance, DriverError> {
        self.instances
            .get_mut(&key(zone, name))
            .ok_or_else(|| DriverError::not_found(ResourceKind::Instance, name))
    }

    fn disk_in_use(&self, zone: &str, name: &str) -> bool {
        self.instances
            .iter()
            .any(|((z, _), instance)| z == zone && instance.disks.iter().any(|d| d == name))
    }
}

fn key(scope: &str, name: &str) -> (String, String) {
    (scope.to_owned(), name.to_owned())
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stateful in-memory driver for workflow tests that need the platform to
/// push back.
#[derive(Debug, Clone)]
pub struct InMemoryDriver {
    config: DriverConfig,
    state: Arc<Mutex<FakeState>>,
}

impl InMemoryDriver {
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        Self { config, state: Arc::new(Mutex::new(FakeState::default())) }
    }

    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Seed an image, e.g. a public base image. Images inserted later count
    /// as newer within a family.
    pub fn insert_image(&self, image: Image) {
        lock(&self.state).images.entry(image.project_id.clone()).or_default().push(image);
    }

    /// Make `user` known to OS-login with an empty key set. Registering a
    /// known user returns its current profile, keys included.
    pub fn register_login_user(&self, user: &str) -> LoginProfile {
        let mut state = lock(&self.state);
        let FakeState { login_profiles, next_uid, .. } = &mut *state;
        login_profiles
            .entry(user.to_owned())
            .or_insert_with(|| {
                let uid = FIRST_LOGIN_UID + *next_uid;
                *next_uid += 1;
                let mut account = PosixAccount::primary(posix_username_for(user));
                account.uid = uid;
                account.gid = uid;
                LoginProfile {
                    name: user.to_owned(),
                    posix_accounts: vec![account],
                    ..LoginProfile::default()
                }
            })
            .clone()
    }

    /// Move an instance to `state`, as the platform would on its own.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for a missing instance.
    pub fn set_instance_state(
        &self,
        zone: &str,
        name: &str,
        state: InstanceState,
    ) -> Result<(), DriverError> {
        lock(&self.state).instance_mut(zone, name)?.state = state;
        tracing::info!(%zone, %name, %state, "instance state changed");
        Ok(())
    }

    /// Write `text` to an instance's serial console.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for a missing instance.
    pub fn append_serial_output(&self, zone: &str, name: &str, text: &str) -> Result<(), DriverError> {
        lock(&self.state).instance_mut(zone, name)?.serial_output.push_str(text);
        Ok(())
    }

    #[must_use]
    pub fn instance_count(&self) -> usize {
        lock(&self.state).instances.len()
    }

    fn lookup_image(&self, project: &str, name: &str, from_family: bool) -> Result<Image, DriverError> {
        lock(&self.state)
            .find_image(project, name, from_family)
            .cloned()
            .ok_or_else(|| DriverError::not_found(ResourceKind::Image, format!("{project}/{name}")))
    }

    fn insert_disk(state: &mut FakeState, project: &str, device: &BlockDevice) -> Result<Disk, DriverError> {
        device.validate()?;
        let location = device.location();
        if state.disks.contains_key(&key(&location, &device.disk_name)) {
            return Err(DriverError::AlreadyExists {
                kind: ResourceKind::Disk,
                name: device.disk_name.clone(),
            });
        }
        let mut disk = device.to_disk();
        disk.self_link = Disk::self_link_for(project, &location, &disk.name, device.is_regional());
        state.disks.insert(key(&location, &disk.name), disk.clone());
        tracing::info!(disk = %disk.name, %location, size_gb = disk.size_gb, "disk created");
        Ok(disk)
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}

/// Password the fake "agent" sets for a reset key.
fn derive_password(config: &WindowsPasswordConfig) -> String {
    let digest = Sha256::new()
        .chain_update(config.user_name.as_bytes())
        .chain_update(config.modulus.as_bytes())
        .chain_update(config.exponent.as_bytes())
        .finalize();
    STANDARD_NO_PAD.encode(digest).chars().take(16).collect()
}

/// Where an instance stands relative to the state being awaited.
fn check_state(
    state: &Mutex<FakeState>,
    desired: InstanceState,
    zone: &str,
    name: &str,
) -> Option<Result<(), DriverError>> {
    let guard = lock(state);
    let actual = match guard.instance(zone, name) {
        Ok(instance) => instance.state,
        Err(err) => return Some(Err(err)),
    };
    if actual == desired {
        Some(Ok(()))
    } else if actual.is_terminal_failure() {
        Some(Err(DriverError::StateNotReached { name: name.to_owned(), desired, actual }))
    } else {
        None
    }
}

#[async_trait]
impl Driver for InMemoryDriver {
    fn create_image(&self, request: CreateImageRequest) -> PendingValue<Image> {
        if let Err(err) = request.validate() {
            return PendingValue::failed(err.into());
        }
        let project = if request.project.is_empty() {
            self.config.project_id.clone()
        } else {
            request.project.clone()
        };

        let mut state = lock(&self.state);
        let Some(disk) = state.disks.get(&key(&request.zone, &request.source_disk)) else {
            tracing::warn!(disk = %request.source_disk, zone = %request.zone, "image source disk missing");
            return PendingValue::failed(DriverError::not_found(ResourceKind::Disk, &request.source_disk));
        };
        if state.find_image(&project, &request.name, false).is_some() {
            return PendingValue::failed(DriverError::AlreadyExists {
                kind: ResourceKind::Image,
                name: request.name,
            });
        }

        let image = Image {
            self_link: ImageSelfLink::new(project.clone(), request.name.clone()).to_string(),
            size_gb: disk.size_gb,
            guest_os_features: request.guest_os_features(),
            project_id: project.clone(),
            name: request.name,
            description: request.description,
            family: request.family,
            labels: request.labels,
            licenses: request.licenses,
            encryption_key: request.encryption_key,
            storage_locations: request.storage_locations,
        };
        state.images.entry(project).or_default().push(image.clone());
        tracing::info!(image = %image.name, project = %image.project_id, "image created");
        PendingValue::ready(image)
    }

    fn delete_image(&self, project: &str, name: &str) -> Completion {
        let mut state = lock(&self.state);
        let not_found = || DriverError::not_found(ResourceKind::Image, format!("{project}/{name}"));
        let Some(images) = state.images.get_mut(project) else {
            return Completion::failed(not_found());
        };
        let before = images.len();
        images.retain(|image| image.name != name);
        if images.len() == before {
            return Completion::failed(not_found());
        }
        tracing::info!(image = %name, %project, "image deleted");
        Completion::succeeded()
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<Completion, DriverError> {
        let mut state = lock(&self.state);
        if state.instances.remove(&key(zone, name)).is_none() {
            return Err(DriverError::not_found(ResourceKind::Instance, name));
        }
        tracing::info!(%zone, %name, "instance deleted");
        Ok(Completion::succeeded())
    }

    fn create_disk(&self, device: BlockDevice) -> PendingValue<Disk> {
        let mut state = lock(&self.state);
        match Self::insert_disk(&mut state, &self.config.project_id, &device) {
            Ok(disk) => PendingValue::ready(disk),
            Err(err) => PendingValue::failed(err),
        }
    }

    fn delete_disk(&self, zone: &str, name: &str) -> Completion {
        let mut state = lock(&self.state);
        if state.disk_in_use(zone, name) {
            return Completion::failed(DriverError::failed(
                "delete disk",
                format!("disk {name} is attached to an instance"),
            ));
        }
        if state.disks.remove(&key(zone, name)).is_none() {
            return Completion::failed(DriverError::not_found(ResourceKind::Disk, name));
        }
        tracing::info!(%zone, disk = %name, "disk deleted");
        Completion::succeeded()
    }

    async fn get_disk(&self, zone_or_region: &str, name: &str) -> Result<Disk, DriverError> {
        lock(&self.state)
            .disks
            .get(&key(zone_or_region, name))
            .cloned()
            .ok_or_else(|| DriverError::not_found(ResourceKind::Disk, name))
    }

    async fn get_image(&self, name: &str, from_family: bool) -> Result<Image, DriverError> {
        let projects = self.config.search_projects();
        if from_family {
            return self.get_image_from_projects(&projects, name, true).await;
        }
        let state = lock(&self.state);
        let matches: Vec<&Image> = projects
            .iter()
            .filter_map(|project| state.find_image(project, name, false))
            .collect();
        match matches.as_slice() {
            [] => Err(DriverError::not_found(ResourceKind::Image, name)),
            [image] => Ok((*image).clone()),
            many => Err(DriverError::Ambiguous {
                name: name.to_owned(),
                projects: many.iter().map(|image| image.project_id.clone()).collect(),
            }),
        }
    }

    async fn get_image_from_project(
        &self,
        project: &str,
        name: &str,
        from_family: bool,
    ) -> Result<Image, DriverError> {
        self.lookup_image(project, name, from_family)
    }

    async fn get_image_from_projects(
        &self,
        projects: &[String],
        name: &str,
        from_family: bool,
    ) -> Result<Image, DriverError> {
        let state = lock(&self.state);
        projects
            .iter()
            .find_map(|project| state.find_image(project, name, from_family))
            .cloned()
            .ok_or_else(|| DriverError::not_found(ResourceKind::Image, name))
    }

    async fn get_instance_metadata(
        &self,
        zone: &str,
        name: &str,
        key: &str,
    ) -> Result<String, DriverError> {
        lock(&self.state)
            .instance(zone, name)?
            .metadata
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::not_found(ResourceKind::MetadataKey, key))
    }

    async fn get_nat_ip(&self, zone: &str, name: &str) -> Result<String, DriverError> {
        Ok(lock(&self.state).instance(zone, name)?.nat_ip.clone())
    }

    async fn get_internal_ip(&self, zone: &str, name: &str) -> Result<String, DriverError> {
        Ok(lock(&self.state).instance(zone, name)?.internal_ip.clone())
    }

    async fn get_serial_port_output(&self, zone: &str, name: &str) -> Result<String, DriverError> {
        Ok(lock(&self.state).instance(zone, name)?.serial_output.clone())
    }

    async fn image_exists(&self, project: &str, name: &str) -> bool {
        self.lookup_image(project, name, false).is_ok()
    }

    async fn run_instance(&self, config: &InstanceConfig) -> Result<Completion, DriverError> {
        config.validate()?;
        let source = config
            .source_image
            .as_ref()
            .ok_or(imagesmith_core::CoreError::MissingField { field: "source_image" })?;
        let source_ref: ImageSelfLink = source.self_link.parse()?;

        let mut state = lock(&self.state);
        if state.instances.contains_key(&key(&config.zone, &config.name)) {
            return Err(DriverError::AlreadyExists {
                kind: ResourceKind::Instance,
                name: config.name.clone(),
            });
        }
        let image = state
            .find_image(&source_ref.project, &source_ref.name, false)
            .cloned()
            .ok_or_else(|| DriverError::not_found(ResourceKind::Image, source.self_link.clone()))?;

        let mut boot = config.boot_device();
        boot.size_gb = boot.size_gb.max(image.size_gb);
        let mut disks = vec![Self::insert_disk(&mut state, &self.config.project_id, &boot)?.name];
        for device in &config.extra_block_devices {
            if !state.disks.contains_key(&key(&device.location(), &device.disk_name)) {
                Self::insert_disk(&mut state, &self.config.project_id, device)?;
            }
            disks.push(device.disk_name.clone());
        }

        state.addresses_assigned += 1;
        let n = state.addresses_assigned;
        let nat_ip = match (config.omit_external_ip, config.address.is_empty()) {
            (true, _) => String::new(),
            (false, false) => config.address.clone(),
            (false, true) => format!("34.0.{}.{}", n / 256, n % 256),
        };
        let instance = FakeInstance {
            state: InstanceState::Running,
            metadata: config.effective_metadata(),
            nat_ip,
            internal_ip: format!("10.128.{}.{}", n / 256, n % 256),
            serial_output: String::new(),
            disks,
        };
        state.instances.insert(key(&config.zone, &config.name), instance);
        tracing::info!(name = %config.name, zone = %config.zone, image = %image.name, "instance running");
        Ok(Completion::succeeded())
    }

    fn wait_for_instance(&self, state: InstanceState, zone: &str, name: &str) -> Completion {
        if let Some(outcome) = check_state(&self.state, state, zone, name) {
            return outcome.map_or_else(Completion::failed, |()| Completion::succeeded());
        }

        let (tx, rx) = Completion::channel();
        let shared = Arc::clone(&self.state);
        let (zone, name) = (zone.to_owned(), name.to_owned());
        let (timeout, poll_interval) = (self.config.state_timeout, self.config.poll_interval);
        tokio::spawn(async move {
            let poll = async {
                loop {
                    tokio::time::sleep(poll_interval).await;
                    if let Some(outcome) = check_state(&shared, state, &zone, &name) {
                        return outcome;
                    }
                }
            };
            match tokio::time::timeout(timeout, poll).await {
                Ok(Ok(())) => tx.succeed(),
                Ok(Err(err)) => {
                    tracing::warn!(%zone, %name, desired = %state, error = %err, "instance wait failed");
                    tx.fail(err);
                }
                Err(_) => {
                    tracing::warn!(%zone, %name, desired = %state, "instance wait timed out");
                    tx.fail(DriverError::Timeout {
                        operation: format!("wait for {name} to reach {state}"),
                        after: timeout,
                    });
                }
            }
        });
        rx
    }

    async fn create_or_reset_windows_password(
        &self,
        instance: &str,
        zone: &str,
        config: &WindowsPasswordConfig,
    ) -> Result<PendingValue<String>, DriverError> {
        if config.expire_on <= Utc::now() {
            return Err(DriverError::Rejected(format!(
                "password reset key for {} already expired",
                config.user_name
            )));
        }
        let mut state = lock(&self.state);
        let target = state.instance_mut(zone, instance)?;
        if target.state != InstanceState::Running {
            return Err(DriverError::Rejected(format!(
                "instance {instance} is {}, not RUNNING",
                target.state
            )));
        }

        let mut keys = target.metadata.get(WINDOWS_KEYS_METADATA_KEY).cloned().unwrap_or_default();
        if !keys.is_empty() {
            keys.push('\n');
        }
        keys.push_str(&config.key_entry());
        target.metadata.insert(WINDOWS_KEYS_METADATA_KEY.to_owned(), keys);

        let password = derive_password(config);
        state.windows_password = Some(password.clone());
        tracing::info!(%instance, %zone, user = %config.user_name, "windows password reset");
        Ok(PendingValue::ready(password))
    }

    async fn import_os_login_ssh_key(
        &self,
        user: &str,
        key: &str,
    ) -> Result<LoginProfile, DriverError> {
        let mut state = lock(&self.state);
        let profile = state
            .login_profiles
            .get_mut(user)
            .ok_or_else(|| DriverError::not_found(ResourceKind::LoginProfile, user))?;
        let parsed: SshPublicKey = key.parse()?;
        profile.ssh_public_keys.insert(parsed.fingerprint(), parsed);
        Ok(profile.clone())
    }

    async fn delete_os_login_ssh_key(
        &self,
        user: &str,
        fingerprint: &str,
    ) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let profile = state
            .login_profiles
            .get_mut(user)
            .ok_or_else(|| DriverError::not_found(ResourceKind::LoginProfile, user))?;
        profile
            .ssh_public_keys
            .remove(fingerprint)
            .map(|_| ())
            .ok_or_else(|| DriverError::not_found(ResourceKind::SshKey, fingerprint))
    }

    fn add_to_instance_metadata(
        &self,
        zone: &str,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Completion {
        let mut state = lock(&self.state);
        match state.instance_mut(zone, name) {
            Ok(instance) => {
                instance.metadata = merge_metadata(&instance.metadata, &metadata);
                Completion::succeeded()
            }
            Err(err) => Completion::failed(err),
        }
    }

    fn get_windows_password(&self) -> Result<String, DriverError> {
        lock(&self.state).windows_password.clone().ok_or(DriverError::PasswordNotRetrieved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_lookup_prefers_newest() {
        let driver = InMemoryDriver::default();
        for name in ["base-v1", "base-v2"] {
            let mut image = Image::new("test", name);
            image.family = "base".to_owned();
            driver.insert_image(image);
        }
        let found = driver.lookup_image("test", "base", true).map(|i| i.name);
        assert_eq!(found, Ok("base-v2".to_owned()));
    }

    #[test]
    fn derived_password_is_stable_and_non_empty() {
        let config = WindowsPasswordConfig::new("u", &[1, 2, 3], &[1, 0, 1], "e", Utc::now());
        let a = derive_password(&config);
        assert_eq!(a.len(), 16);
        assert_eq!(a, derive_password(&config));
    }

    #[test]
    fn registered_users_get_distinct_uids() {
        let driver = InMemoryDriver::default();
        let a = driver.register_login_user("a@example.com");
        let b = driver.register_login_user("b@example.com");
        assert_eq!(a.posix_accounts[0].uid, FIRST_LOGIN_UID);
        assert_eq!(b.posix_accounts[0].uid, FIRST_LOGIN_UID + 1);
        assert_eq!(b.primary_username(), Some("b_example_com"));
    }

    #[tokio::test]
    async fn re_registering_keeps_uid_and_keys() {
        let driver = InMemoryDriver::default();
        let first = driver.register_login_user("a@example.com");
        let key = format!("ssh-ed25519 {}", imagesmith_core::oslogin::encode_key_blob("ssh-ed25519", &[3; 32]));
        if let Err(e) = driver.import_os_login_ssh_key("a@example.com", &key).await {
            panic!("unexpected error: {e}");
        }

        let again = driver.register_login_user("a@example.com");
        assert_eq!(again.posix_accounts[0].uid, first.posix_accounts[0].uid);
        assert_eq!(again.ssh_public_keys.len(), 1, "imported keys survive");

        let b = driver.register_login_user("b@example.com");
        assert_ne!(b.posix_accounts[0].uid, first.posix_accounts[0].uid);
        assert_eq!(b.posix_accounts[0].uid, FIRST_LOGIN_UID + 1);
    }

    #[tokio::test]
    async fn deleting_from_unknown_project_leaves_registry_untouched() {
        let driver = InMemoryDriver::default();
        let result = driver.delete_image("nowhere", "img").wait().await;
        assert!(result.is_err_and(|e| e.is_not_found()));
        assert!(!lock(&driver.state).images.contains_key("nowhere"));
    }

    #[tokio::test]
    async fn deserialized_config_finds_images_in_own_project() {
        let config: DriverConfig = match serde_json::from_str(r#"{"project_id": "builds"}"#) {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        let driver = InMemoryDriver::new(config);
        driver.insert_image(Image::new("builds", "golden"));
        let found = driver.get_image("golden", false).await.map(|i| i.project_id);
        assert_eq!(found, Ok("builds".to_owned()));
    }
}
