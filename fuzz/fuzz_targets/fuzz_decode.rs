//! Fuzz target for the payload codec.
//!
//! `decode` must never panic on arbitrary input, and anything it accepts
//! must re-encode to a payload that decodes to the same bytes.

#![no_main]

use feed_mirror::codec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(decoded) = codec::decode(data) {
        let reencoded = codec::encode(&decoded).expect("decoded payload fits the header");
        assert_eq!(codec::decode(&reencoded).expect("round trip"), decoded);
    }
});
