//! Arbitrary bytes from the host PC must never panic the reader

#![no_main]

use hostlink_wire::{LineBuffer, LineCodec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buffer = LineBuffer::new();
    // First byte picks the chunk size so split points vary
    let chunk = data.first().map_or(1, |b| (*b as usize % 32) + 1);
    for piece in data.chunks(chunk) {
        buffer.extend(piece);
        while let Some(line) = buffer.next_line() {
            if let Ok(line) = line {
                if let Ok(message) = LineCodec::decode(&line) {
                    let encoded = LineCodec::encode(&message).expect("decoded message re-encodes");
                    assert!(!encoded.contains('\n'));
                }
            }
        }
    }
    let _ = buffer.take_remainder();
});
