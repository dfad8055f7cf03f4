//! OS-login profiles and SSH public keys.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Key algorithms accepted for import.
pub const SUPPORTED_KEY_ALGORITHMS: [&str; 5] = [
    "ssh-rsa",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
];

/// A POSIX account linked to a directory identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PosixAccount {
    pub primary: bool,
    pub username: String,
    pub uid: u64,
    pub gid: u64,
    pub home_directory: String,
}

impl PosixAccount {
    /// Primary account with a home directory under `/home`.
    #[must_use]
    pub fn primary(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            primary: true,
            home_directory: format!("/home/{username}"),
            username,
            ..Self::default()
        }
    }
}

/// The login profile returned when a key is imported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginProfile {
    /// Directory identity, usually an email address.
    pub name: String,
    pub posix_accounts: Vec<PosixAccount>,
    /// Imported keys by fingerprint.
    pub ssh_public_keys: BTreeMap<String, SshPublicKey>,
}

impl LoginProfile {
    /// Username of the primary POSIX account, if there is one.
    #[must_use]
    pub fn primary_username(&self) -> Option<&str> {
        self.posix_accounts
            .iter()
            .find(|account| account.primary)
            .map(|account| account.username.as_str())
    }
}

/// Derive the POSIX username the directory assigns to an identity:
/// lowercase, with anything outside `[a-z0-9]` replaced by `_`.
#[must_use]
pub fn posix_username_for(identity: &str) -> String {
    identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// An OpenSSH public key in `<algorithm> <base64-blob> [comment]` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SshPublicKey {
    pub algorithm: String,
    /// Base64 wire-format key blob.
    pub blob: String,
    pub comment: Option<String>,
}

impl SshPublicKey {
    /// Lowercase hex SHA-256 of `<algorithm> <blob>`.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::new()
            .chain_update(self.algorithm.as_bytes())
            .chain_update(b" ")
            .chain_update(self.blob.as_bytes())
            .finalize();
        digest.iter().fold(String::with_capacity(64), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })
    }
}

impl fmt::Display for SshPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.blob)?;
        if let Some(comment) = &self.comment {
            write!(f, " {comment}")?;
        }
        Ok(())
    }
}

impl FromStr for SshPublicKey {
    type Err = CoreError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| CoreError::MalformedSshKey { reason: reason.to_owned() };

        let mut parts = key.split_whitespace();
        let algorithm = parts.next().ok_or_else(|| malformed("empty key"))?;
        let blob = parts.next().ok_or_else(|| malformed("missing key blob"))?;
        let comment = parts.collect::<Vec<_>>().join(" ");

        if !SUPPORTED_KEY_ALGORITHMS.contains(&algorithm) {
            return Err(malformed(&format!("unsupported algorithm '{algorithm}'")));
        }
        let decoded = STANDARD.decode(blob).map_err(|e| malformed(&format!("blob is not base64: {e}")))?;

        // The wire format repeats the algorithm as a length-prefixed string.
        let embedded = decoded
            .get(..4)
            .and_then(|len| <[u8; 4]>::try_from(len).ok())
            .map(|len| u32::from_be_bytes(len) as usize)
            .and_then(|len| decoded.get(4..4usize.checked_add(len)?))
            .ok_or_else(|| malformed("truncated key blob"))?;
        if embedded != algorithm.as_bytes() {
            return Err(malformed("blob algorithm does not match key type"));
        }

        Ok(Self {
            algorithm: algorithm.to_owned(),
            blob: blob.to_owned(),
            comment: (!comment.is_empty()).then_some(comment),
        })
    }
}

/// Build the base64 blob for a key of `algorithm` with opaque key bytes.
/// Used by tests and fixtures that need a well-formed key.
#[must_use]
pub fn encode_key_blob(algorithm: &str, key_data: &[u8]) -> String {
    let mut wire = Vec::with_capacity(4 + algorithm.len() + key_data.len());
    wire.extend_from_slice(&u32::try_from(algorithm.len()).unwrap_or(u32::MAX).to_be_bytes());
    wire.extend_from_slice(algorithm.as_bytes());
    wire.extend_from_slice(key_data);
    STANDARD.encode(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ed25519_key(comment: &str) -> String {
        format!("ssh-ed25519 {} {comment}", encode_key_blob("ssh-ed25519", &[7u8; 32]))
    }

    #[test]
    fn parse_keeps_comment_with_spaces() {
        let key: SshPublicKey = match ed25519_key("builder key").parse() {
            Ok(k) => k,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(key.algorithm, "ssh-ed25519");
        assert_eq!(key.comment.as_deref(), Some("builder key"));
        assert_eq!(key.to_string(), ed25519_key("builder key"));
    }

    #[test]
    fn parse_rejects_mismatched_blob() {
        let key = format!("ssh-rsa {}", encode_key_blob("ssh-ed25519", &[1, 2, 3]));
        assert!(matches!(key.parse::<SshPublicKey>(), Err(CoreError::MalformedSshKey { .. })));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<SshPublicKey>().is_err());
        assert!("ssh-ed25519".parse::<SshPublicKey>().is_err());
        assert!("ssh-ed25519 !!!notbase64".parse::<SshPublicKey>().is_err());
        assert!("ssh-foo AAAA".parse::<SshPublicKey>().is_err());
        assert!("ssh-ed25519 AAAA".parse::<SshPublicKey>().is_err());
    }

    #[test]
    fn fingerprint_ignores_comment() {
        let a: SshPublicKey = ed25519_key("one").parse().unwrap_or_else(|e| panic!("{e}"));
        let b: SshPublicKey = ed25519_key("two").parse().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn posix_username_replaces_separators() {
        assert_eq!(posix_username_for("Jane.Doe@example.com"), "jane_doe_example_com");
    }

    #[test]
    fn primary_username_skips_secondary_accounts() {
        let profile = LoginProfile {
            posix_accounts: vec![
                PosixAccount { username: "other".to_owned(), ..PosixAccount::default() },
                PosixAccount::primary("main"),
            ],
            ..LoginProfile::default()
        };
        assert_eq!(profile.primary_username(), Some("main"));
    }

    proptest::proptest! {
        #[test]
        fn proptest_fingerprint_always_64_hex_chars(
            data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..128usize),
        ) {
            let key = SshPublicKey {
                algorithm: "ssh-rsa".to_owned(),
                blob: encode_key_blob("ssh-rsa", &data),
                comment: None,
            };
            let fp = key.fingerprint();
            proptest::prop_assert_eq!(fp.len(), 64);
            proptest::prop_assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
