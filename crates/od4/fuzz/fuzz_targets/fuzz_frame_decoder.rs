// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuzz target for the streaming frame decoder.
//!
//! The input is fed in pieces whose sizes come from the input itself, the way
//! a TCP stream or fragmented datagrams would deliver it.

#![no_main]

use libfuzzer_sys::fuzz_target;
use od4::codec::FrameDecoder;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    let mut rest = data;
    while let Some((&step, tail)) = rest.split_first() {
        let take = usize::from(step % 64).min(tail.len());
        decoder.push(&tail[..take]);
        rest = &tail[take..];
        while decoder.next_envelope().is_some() {}
    }
    // everything left is at most one partial frame
    assert!(decoder.next_envelope().is_none());
});
