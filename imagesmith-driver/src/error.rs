//! Error types for the driver crate.

use std::fmt;
use std::time::Duration;

use imagesmith_core::{CoreError, InstanceState};

/// Kind of remote resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ResourceKind {
    Image,
    Disk,
    Instance,
    MetadataKey,
    LoginProfile,
    SshKey,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Image => "image",
            Self::Disk => "disk",
            Self::Instance => "instance",
            Self::MetadataKey => "metadata key",
            Self::LoginProfile => "login profile",
            Self::SshKey => "SSH key",
        })
    }
}

/// Errors returned by driver operations.
///
/// Returned synchronously they are dispatch or query failures; delivered
/// through a [`Completion`](crate::Completion) they are completion failures.
/// `Clone` so a programmed mock can hand out the same error on every call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The named resource does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    /// A name lookup matched images in more than one project.
    #[error("image name {name} is ambiguous across projects {projects:?}")]
    Ambiguous { name: String, projects: Vec<String> },

    /// A resource with this name already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// The request failed local validation and was never sent.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] CoreError),

    /// The remote side refused the request before changing any state.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The operation started but did not finish successfully.
    #[error("{operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    /// An instance settled in a state other than the one awaited.
    #[error("instance {name} reached {actual} while waiting for {desired}")]
    StateNotReached {
        name: String,
        desired: InstanceState,
        actual: InstanceState,
    },

    /// Waiting for an operation exceeded its deadline.
    #[error("{operation} did not complete within {after:?}")]
    Timeout { operation: String, after: Duration },

    /// No Windows password has been retrieved yet.
    #[error("no Windows password has been retrieved")]
    PasswordNotRetrieved,

    /// A driver broke the signal contract, e.g. a value stream closed empty.
    #[error("driver protocol violation: {0}")]
    ProtocolViolation(String),

    /// The transport to the remote API failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl DriverError {
    /// Shorthand for [`DriverError::NotFound`].
    #[must_use]
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }

    /// Shorthand for [`DriverError::OperationFailed`].
    #[must_use]
    pub fn failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OperationFailed { operation: operation.into(), reason: reason.into() }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_names_kind_and_resource() {
        let err = DriverError::not_found(ResourceKind::Instance, "build-1");
        assert_eq!(err.to_string(), "instance not found: build-1");
        assert!(err.is_not_found());
    }

    #[test]
    fn core_errors_convert_to_invalid_request() {
        let err: DriverError = CoreError::MissingField { field: "zone" }.into();
        assert!(matches!(err, DriverError::InvalidRequest(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn state_not_reached_display_uses_platform_labels() {
        let err = DriverError::StateNotReached {
            name: "b".to_owned(),
            desired: InstanceState::Stopped,
            actual: InstanceState::Terminated,
        };
        let msg = err.to_string();
        assert!(msg.contains("TERMINATED") && msg.contains("STOPPED"), "got {msg}");
    }
}
