//! Fuzz target for the server-line tokenizer
//!
//! Feeds arbitrary input through `Line::parse` and ensures it never
//! panics; malformed lines must come back as errors.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::str;

fuzz_target!(|data: &[u8]| {
    // Only fuzz valid UTF-8 strings to focus on protocol-level issues
    if let Ok(input) = str::from_utf8(data) {
        if input.is_empty() || input.len() > 8192 {
            return;
        }
        let _ = slink_proto::Line::parse(input);
    }
});
