//! Fuzz target: persisted document parse + `validate_config`
//!
//! Feeds arbitrary bytes to the JSON document parser.  Whatever parses
//! must validate without panicking, and a document that validates must
//! survive a serialise/parse cycle unchanged in meaning.
//!
//! cargo fuzz run fuzz_config

#![no_main]

use heatctl::config::{SystemConfig, validate_config};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(cfg) = serde_json::from_slice::<SystemConfig>(data) else {
        return;
    };
    if validate_config(&cfg).is_err() {
        return;
    }

    let json = serde_json::to_vec(&cfg).expect("valid document must serialise");
    let back: SystemConfig = serde_json::from_slice(&json).expect("own output must parse");
    assert!(validate_config(&back).is_ok(), "round-tripped document must still validate");
    assert_eq!(back.heaters.len(), cfg.heaters.len());
});
