//! Machine images and the request used to create them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Base URL every canonical self-link starts with.
pub const COMPUTE_API_BASE: &str = "https://www.googleapis.com/compute/v1";

/// A machine image as reported by the compute platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Image {
    /// Project that owns the image.
    pub project_id: String,
    /// Image name, unique within its project.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Image family this image belongs to, empty if none.
    pub family: String,
    /// Canonical URL of the image.
    pub self_link: String,
    /// Size of the image in GiB.
    pub size_gb: u64,
    /// User labels.
    pub labels: BTreeMap<String, String>,
    /// License self-links.
    pub licenses: Vec<String>,
    /// Firmware and boot capabilities advertised by the image.
    pub guest_os_features: Vec<GuestOsFeature>,
    /// Key protecting the image, if customer managed.
    pub encryption_key: Option<CustomerEncryptionKey>,
    /// Regions or multi-regions where the image is stored.
    pub storage_locations: Vec<String>,
}

impl Image {
    /// Create an image with a canonical self-link and no other attributes.
    #[must_use]
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        let project_id = project_id.into();
        let name = name.into();
        let self_link = ImageSelfLink::new(project_id.clone(), name.clone()).to_string();
        Self {
            project_id,
            name,
            self_link,
            ..Self::default()
        }
    }

    /// Whether the image advertises the given guest-OS feature tag.
    #[must_use]
    pub fn has_feature(&self, tag: &str) -> bool {
        self.guest_os_features.iter().any(|f| f.feature_type == tag)
    }
}

/// A single guest-OS feature tag, e.g. `UEFI_COMPATIBLE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestOsFeature {
    /// The feature tag.
    #[serde(rename = "type")]
    pub feature_type: String,
}

impl GuestOsFeature {
    /// Wrap a feature tag.
    #[must_use]
    pub fn new(feature_type: impl Into<String>) -> Self {
        Self { feature_type: feature_type.into() }
    }
}

/// Reference to customer-managed key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CustomerEncryptionKey {
    /// Base64 key supplied directly by the customer.
    RawKey(String),
    /// Resource name of a key held in the key management service.
    KmsKeyName(String),
}

/// The `(project, name)` pair a self-link points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageSelfLink {
    pub project: String,
    pub name: String,
}

impl ImageSelfLink {
    #[must_use]
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self { project: project.into(), name: name.into() }
    }
}

impl fmt::Display for ImageSelfLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COMPUTE_API_BASE}/{}/global/images/{}", self.project, self.name)
    }
}

impl FromStr for ImageSelfLink {
    type Err = CoreError;

    /// Accepts `http` or `https`, any host, and an optional `projects/`
    /// segment before the project id.
    fn from_str(link: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::InvalidSelfLink {
            link: link.to_owned(),
            reason: reason.to_owned(),
        };

        let rest = link
            .strip_prefix("https://")
            .or_else(|| link.strip_prefix("http://"))
            .ok_or_else(|| invalid("missing http(s) scheme"))?;
        let (host, path) = rest
            .split_once("/compute/v1/")
            .ok_or_else(|| invalid("missing /compute/v1/ path"))?;
        if host.is_empty() || host.contains('/') {
            return Err(invalid("bad host"));
        }

        let segments: Vec<&str> = path.split('/').collect();
        match segments.as_slice() {
            ["projects", project, "global", "images", name]
            | [project, "global", "images", name]
                if !project.is_empty() && !name.is_empty() =>
            {
                Ok(Self::new(*project, *name))
            }
            _ => Err(invalid("expected <project>/global/images/<name>")),
        }
    }
}

/// Everything needed to create an image from a source disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateImageRequest {
    pub project: String,
    pub name: String,
    pub description: String,
    pub family: String,
    /// Zone of the source disk.
    pub zone: String,
    /// Name of the disk the image is captured from.
    pub source_disk: String,
    pub labels: BTreeMap<String, String>,
    pub licenses: Vec<String>,
    /// Guest-OS feature tags to advertise.
    pub features: Vec<String>,
    pub encryption_key: Option<CustomerEncryptionKey>,
    pub storage_locations: Vec<String>,
}

impl CreateImageRequest {
    /// Request with only the required fields set.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        name: impl Into<String>,
        zone: impl Into<String>,
        source_disk: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            zone: zone.into(),
            source_disk: source_disk.into(),
            ..Self::default()
        }
    }

    /// Check that the platform would accept this request.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingField`] for the first empty required field.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::MissingField { field: "name" });
        }
        if self.zone.is_empty() {
            return Err(CoreError::MissingField { field: "zone" });
        }
        if self.source_disk.is_empty() {
            return Err(CoreError::MissingField { field: "source_disk" });
        }
        Ok(())
    }

    /// The feature tags as [`GuestOsFeature`] values, in request order.
    #[must_use]
    pub fn guest_os_features(&self) -> Vec<GuestOsFeature> {
        self.features.iter().map(GuestOsFeature::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_link_display_embeds_project_and_name() {
        let link = ImageSelfLink::new("test", "debian-build").to_string();
        assert_eq!(
            link,
            "https://www.googleapis.com/compute/v1/test/global/images/debian-build"
        );
        assert!(link.contains("/test/global/"));
    }

    #[test]
    fn self_link_parse_accepts_projects_segment() {
        let parsed: ImageSelfLink =
            match "https://compute.googleapis.com/compute/v1/projects/p1/global/images/img".parse() {
                Ok(l) => l,
                Err(e) => panic!("unexpected error: {e}"),
            };
        assert_eq!(parsed, ImageSelfLink::new("p1", "img"));
    }

    #[test]
    fn self_link_parse_rejects_other_resources() {
        let err = "https://www.googleapis.com/compute/v1/p1/global/licenses/test"
            .parse::<ImageSelfLink>()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSelfLink { .. }));
        assert!("ftp://host/compute/v1/p/global/images/n".parse::<ImageSelfLink>().is_err());
        assert!("https:///compute/v1/p/global/images/n".parse::<ImageSelfLink>().is_err());
    }

    #[test]
    fn create_request_validate_reports_first_missing_field() {
        let mut req = CreateImageRequest::new("p", "", "z", "d");
        assert_eq!(req.validate(), Err(CoreError::MissingField { field: "name" }));
        req.name = "n".to_owned();
        req.source_disk.clear();
        assert_eq!(req.validate(), Err(CoreError::MissingField { field: "source_disk" }));
        req.source_disk = "d".to_owned();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn guest_os_features_keep_request_order() {
        let mut req = CreateImageRequest::new("p", "n", "z", "d");
        req.features = vec!["UEFI_COMPATIBLE".to_owned(), "GVNIC".to_owned()];
        let features = req.guest_os_features();
        assert_eq!(features[0].feature_type, "UEFI_COMPATIBLE");
        assert_eq!(features[1].feature_type, "GVNIC");
    }

    #[test]
    fn image_serializes_with_platform_field_names() {
        let mut image = Image::new("p", "n");
        image.guest_os_features.push(GuestOsFeature::new("UEFI_COMPATIBLE"));
        image.encryption_key = Some(CustomerEncryptionKey::KmsKeyName("keys/k".to_owned()));
        let json = serde_json::to_value(&image).unwrap_or_default();
        assert_eq!(json["selfLink"], image.self_link.as_str());
        assert_eq!(json["guestOsFeatures"][0]["type"], "UEFI_COMPATIBLE");
        assert_eq!(json["encryptionKey"]["kmsKeyName"], "keys/k");
    }

    proptest::proptest! {
        #[test]
        fn proptest_self_link_parses_back(
            project in "[a-z][a-z0-9-]{0,29}",
            name in "[a-z][a-z0-9-]{0,62}",
        ) {
            let link = ImageSelfLink::new(project.clone(), name.clone());
            let parsed = link.to_string().parse::<ImageSelfLink>();
            proptest::prop_assert_eq!(parsed, Ok(link));
        }
    }
}
