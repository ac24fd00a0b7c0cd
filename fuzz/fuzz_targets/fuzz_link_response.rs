//! Fuzz target: outlet board response decoding
//!
//! Arbitrary response lines must decode without panicking: temperatures
//! are finite or rejected, and only the exact echo acknowledges a command.
//!
//! cargo fuzz run fuzz_link_response

#![no_main]

use heatctl::drivers::link::{decode_echo, decode_feedback, decode_temperature};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&command, rest)) = data.split_first() else {
        return;
    };
    let response = String::from_utf8_lossy(rest);
    let response = response.trim();

    if let Ok(t) = decode_temperature(response) {
        assert!(t.is_finite());
    }
    let _ = decode_feedback(response);
    if decode_echo(command, response) {
        assert_eq!(response.as_bytes(), &[command]);
    }
});
