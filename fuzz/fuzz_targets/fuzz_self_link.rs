//! Fuzz target: image self-link parsing.
//!
//! Any link that parses must render back to a link that parses to the
//! same project and name.

#![no_main]

use imagesmith_core::ImageSelfLink;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(link) = text.parse::<ImageSelfLink>() else {
        return;
    };
    let rendered = link.to_string();
    let reparsed: ImageSelfLink = rendered.parse().expect("rendered self-link must parse");
    assert_eq!(reparsed, link);
});
