//! Fuzz target: gascard line parsers
//!
//! Feeds arbitrary text through every parser a received line can reach
//! and checks that they never panic and agree with the prefix classifier.
//!
//! cargo fuzz run fuzz_gascard_line

#![no_main]

use gasmux::sensors::gascard::protocol::{self, LineKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };

    let kind = protocol::classify(line);
    let _ = protocol::match_banner(line);

    if protocol::parse_channel(line).is_ok() {
        assert!(
            line.trim_start().starts_with("N1"),
            "telemetry parsed from a non-N1 line"
        );
    }
    if let Ok(settings) = protocol::parse_settings(line) {
        assert!(!settings.firmware_version.is_empty());
    }
    if kind == LineKind::NormalChannel {
        assert!(line.starts_with("N1"));
    }
});
