// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuzz target for single-frame envelope decoding.
//!
//! Any input must decode or fail cleanly, and whatever decodes must survive
//! a re-encode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = od4::codec::deserialize(data) {
        let bytes = od4::codec::serialize(&envelope).expect("decoded envelope re-encodes");
        let again = od4::codec::deserialize(&bytes).expect("re-encoded envelope decodes");
        assert_eq!(envelope, again);
    }

    // bare body without the frame header
    let _ = od4::codec::decode_body(data);
});
