//! Fuzz target: OpenSSH public key lines.
//!
//! Parsing arbitrary text must never panic, and an accepted key must
//! survive a render and reparse with an unchanged fingerprint.

#![no_main]

use imagesmith_core::SshPublicKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(key) = text.parse::<SshPublicKey>() else {
        return;
    };
    let reparsed: SshPublicKey = key.to_string().parse().expect("rendered key must parse");
    assert_eq!(reparsed.fingerprint(), key.fingerprint());
});
