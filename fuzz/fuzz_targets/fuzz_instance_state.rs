//! Fuzz target: instance state names.

#![no_main]

use imagesmith_core::InstanceState;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(state) = text.parse::<InstanceState>() {
        assert_eq!(state.as_str(), text);
    }
});
