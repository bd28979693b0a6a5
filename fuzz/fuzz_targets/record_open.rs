//! Fuzz target for record opening
//!
//! Arbitrary sealed payloads must either open (only for honestly sealed
//! bytes) or fail cleanly with an error. Any panic is a bug.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilwire_crypto::{open_record, SubKey};

fuzz_target!(|data: &[u8]| {
    if data.len() < 64 {
        return;
    }

    let mut frame_bytes = [0u8; 32];
    frame_bytes.copy_from_slice(&data[..32]);
    let mut mac_bytes = [0u8; 32];
    mac_bytes.copy_from_slice(&data[32..64]);

    let frame_key = SubKey::new(frame_bytes);
    let mac_key = SubKey::new(mac_bytes);

    let _ = open_record(&frame_key, &mac_key, 0, 0, &[1, 0, 0, 0], &data[64..]);
});
