//! Fuzz target for mode string parsing
//!
//! Splits arbitrary input into whitespace tokens and runs the mode parser
//! over them against a fixed vocabulary; it must never panic, for either
//! target kind.

#![no_main]

use libfuzzer_sys::fuzz_target;
use slink_proto::vocab::ModeClasses;
use slink_proto::{parse_modes, ModeTarget, ModeVocabulary};
use std::str;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = str::from_utf8(data) {
        if input.is_empty() || input.len() > 512 {
            return;
        }
        let mut vocab = ModeVocabulary::default();
        vocab.cmode_classes = ModeClasses::parse("IXbegw,k,FHJLfjl,ACKMNOPQRSTUcimnprstz")
            .expect("static class spec");
        vocab.umode_classes =
            ModeClasses::parse(",,s,BHIRSWcghikorwx").expect("static class spec");
        let _ = vocab.learn_prefixes("(Yqaohv)!~&@%+");

        let pieces: Vec<&str> = input.split_whitespace().collect();
        let _ = parse_modes(&vocab, ModeTarget::Channel, &pieces);
        let _ = parse_modes(&vocab, ModeTarget::User, &pieces);
    }
});
