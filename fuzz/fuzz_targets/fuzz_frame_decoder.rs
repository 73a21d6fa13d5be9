//! Fuzz target: `try_decode`
//!
//! Drives arbitrary byte sequences, delivered in arbitrary slices, through
//! the receive ring buffer and the frame decoder. Asserts that decoding
//! never panics, always makes progress, and never yields a payload longer
//! than one chunk.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use ota_bt::ota::decoder::{Decoded, try_decode};
use ota_bt::ota::protocol::{Frame, MAX_CHUNK_PAYLOAD};
use ota_bt::ota::ring_buffer::RingBuffer;

fuzz_target!(|data: &[u8]| {
    let Some((&step, bytes)) = data.split_first() else {
        return;
    };
    let step = usize::from(step).max(1);
    let mut rb = RingBuffer::<4096>::new();

    for delivery in bytes.chunks(step) {
        rb.append(delivery);
        loop {
            let before = rb.len();
            match try_decode(&mut rb) {
                Decoded::NeedMore => {
                    assert_eq!(rb.len(), before, "NeedMore must not consume");
                    break;
                }
                Decoded::Frame(Frame::DataChunk { payload }) => {
                    assert!(payload.len() <= MAX_CHUNK_PAYLOAD);
                }
                _ => {}
            }
            assert!(rb.len() < before, "decoder must make progress");
        }
    }

    // After a clear the buffer must accept bytes cleanly again.
    rb.clear();
    rb.append(bytes);
    while try_decode(&mut rb) != Decoded::NeedMore {}
});
