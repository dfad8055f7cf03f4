//! Windows password reset key exchange.
//!
//! The caller generates an RSA key pair and publishes the public half as a
//! `windows-keys` metadata entry; the guest agent answers with the password
//! encrypted to that key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Instance metadata key holding the published password-reset keys.
pub const WINDOWS_KEYS_METADATA_KEY: &str = "windows-keys";

/// Public key material and account details for one password reset.
///
/// The resolved password is not stored here; it is delivered by the
/// driver's reset operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsPasswordConfig {
    pub user_name: String,
    /// Base64 of the RSA modulus.
    pub modulus: String,
    /// Base64 of the RSA public exponent.
    pub exponent: String,
    pub email: String,
    /// After this instant the agent ignores the key.
    pub expire_on: DateTime<Utc>,
}

impl WindowsPasswordConfig {
    /// Build a config from raw big-endian RSA public key components.
    #[must_use]
    pub fn new(
        user_name: impl Into<String>,
        modulus: &[u8],
        exponent: &[u8],
        email: impl Into<String>,
        expire_on: DateTime<Utc>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            modulus: STANDARD.encode(modulus),
            exponent: STANDARD.encode(exponent),
            email: email.into(),
            expire_on,
        }
    }

    /// The JSON line appended to the `windows-keys` metadata value.
    #[must_use]
    pub fn key_entry(&self) -> String {
        serde_json::json!({
            "userName": self.user_name,
            "modulus": self.modulus,
            "exponent": self.exponent,
            "email": self.email,
            "expireOn": self.expire_on.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample() -> WindowsPasswordConfig {
        let expire_on = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).single().unwrap_or_default();
        WindowsPasswordConfig::new("builder", &[0xc0, 0xff, 0xee], &[0x01, 0x00, 0x01], "b@example.com", expire_on)
    }

    #[test]
    fn components_are_base64_encoded() {
        let config = sample();
        assert_eq!(config.modulus, "wP/u");
        assert_eq!(config.exponent, "AQAB");
    }

    #[test]
    fn key_entry_uses_agent_field_names() {
        let entry: serde_json::Value = match serde_json::from_str(&sample().key_entry()) {
            Ok(v) => v,
            Err(e) => panic!("key entry is not JSON: {e}"),
        };
        assert_eq!(entry["userName"], "builder");
        assert_eq!(entry["exponent"], "AQAB");
        assert_eq!(entry["email"], "b@example.com");
        assert_eq!(entry["expireOn"], "2030-01-02T03:04:05Z");
    }
}
