//! Fuzz target for tag trial decryption
//!
//! Feeds arbitrary keys and tag bytes through decode_tag. Trial decryption
//! runs against every inbound connection attempt, so it must never panic on
//! hostile input, and a decoded connection number must always re-encode to
//! the same tag under the same key.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilwire_crypto::{decode_tag, encode_tag, SubKey, TAG_LENGTH};

fuzz_target!(|data: &[u8]| {
    if data.len() < 32 + TAG_LENGTH {
        return;
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&data[..32]);
    let key = SubKey::new(key_bytes);

    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&data[32..32 + TAG_LENGTH]);

    if let Some(connection) = decode_tag(&key, &tag) {
        // A structural match must round-trip
        let reencoded = encode_tag(&key, connection).expect("decoded number is in range");
        assert_eq!(reencoded, tag);
    }
});
