/// Errors produced by the `imagesmith-core` crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A request was missing a field the platform requires.
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    /// An image self-link could not be parsed.
    #[error("invalid image self-link '{link}': {reason}")]
    InvalidSelfLink { link: String, reason: String },

    /// An instance state label is not one the platform reports.
    #[error("unknown instance state '{0}'")]
    InvalidInstanceState(String),

    /// An SSH public key was not in `<algorithm> <base64> [comment]` form.
    #[error("malformed SSH public key: {reason}")]
    MalformedSshKey { reason: String },

    /// A block device configuration is inconsistent.
    #[error("invalid block device '{disk}': {reason}")]
    InvalidBlockDevice { disk: String, reason: String },
}
