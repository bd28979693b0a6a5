//! Fuzz target for Record::decode
//!
//! This fuzzer tests record decoding with arbitrary byte sequences to find:
//! - Parser crashes or panics
//! - Integer overflows in size calculations
//! - Buffer over-reads
//! - Malformed headers that bypass validation
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilwire_proto::Record;

fuzz_target!(|data: &[u8]| {
    // Attempt to decode arbitrary bytes as a record stream
    // This should never panic, only return Err for invalid data
    let mut offset = 0;
    while offset < data.len() {
        match Record::decode(&data[offset..]) {
            Ok((_, consumed)) => offset += consumed,
            Err(_) => break,
        }
    }
});
