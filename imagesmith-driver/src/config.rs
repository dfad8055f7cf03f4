//! Driver configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Public projects searched by name-only image lookups after the driver's
/// own project.
pub const PUBLIC_IMAGE_PROJECTS: [&str; 6] = [
    "centos-cloud",
    "cos-cloud",
    "debian-cloud",
    "rocky-linux-cloud",
    "ubuntu-os-cloud",
    "windows-cloud",
];

/// Settings shared by driver implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Project that owns the instances, disks and created images.
    pub project_id: String,

    /// Projects searched, in order, by [`Driver::get_image`](crate::Driver::get_image).
    /// Empty means the driver's own project followed by
    /// [`PUBLIC_IMAGE_PROJECTS`]; see [`DriverConfig::search_projects`].
    pub image_projects: Vec<String>,

    /// How long to wait for an instance to reach a desired state.
    pub state_timeout: Duration,

    /// Interval between state checks while waiting.
    pub poll_interval: Duration,
}

impl DriverConfig {
    /// Config for `project_id` with the public image projects appended and
    /// a five minute state timeout.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        let mut config = Self { project_id: project_id.into(), ..Self::default() };
        config.image_projects = config.search_projects();
        config
    }

    /// Projects searched by name-only image lookups. Falls back to the own
    /// project followed by the public image projects when none are set.
    #[must_use]
    pub fn search_projects(&self) -> Vec<String> {
        if !self.image_projects.is_empty() {
            return self.image_projects.clone();
        }
        std::iter::once(self.project_id.clone())
            .chain(PUBLIC_IMAGE_PROJECTS.iter().map(|p| (*p).to_owned()))
            .collect()
    }

    /// Override the state wait deadline and polling interval.
    #[must_use]
    pub fn with_timeouts(mut self, state_timeout: Duration, poll_interval: Duration) -> Self {
        self.state_timeout = state_timeout;
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for DriverConfig {
    /// Project `"test"` with no explicit search list, so a deserialized
    /// config that only names its project still searches that project first.
    fn default() -> Self {
        Self {
            project_id: "test".to_owned(),
            image_projects: Vec::new(),
            state_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_project_is_searched_first() {
        let config = DriverConfig::new("builds");
        assert_eq!(config.image_projects[0], "builds");
        assert_eq!(config.image_projects.len(), PUBLIC_IMAGE_PROJECTS.len() + 1);
    }

    #[test]
    fn partial_config_searches_its_own_project_first() {
        let config: DriverConfig = match serde_json::from_str(r#"{"project_id": "builds"}"#) {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(config.project_id, "builds");
        assert_eq!(config.state_timeout, Duration::from_secs(300));
        assert!(config.image_projects.is_empty());
        let search = config.search_projects();
        assert_eq!(search[0], "builds");
        assert!(!search.iter().any(|p| p == "test"));
        assert_eq!(search.len(), PUBLIC_IMAGE_PROJECTS.len() + 1);
    }

    #[test]
    fn explicit_search_list_is_kept() {
        let mut config = DriverConfig::new("builds");
        config.image_projects = vec!["shared-images".to_owned()];
        assert_eq!(config.search_projects(), vec!["shared-images".to_owned()]);
    }
}
