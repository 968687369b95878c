//! Random-input fuzzer for incremental frame decoding.
//!
//! The first byte picks a chunk size; the rest is fed to a `FrameReader` in
//! chunks of that size. Checks that:
//! - Decoding never panics, whatever the bytes
//! - Chunked decoding yields the same frames as one-shot decoding
//! - Every decoded frame re-encodes to bytes that decode to the same frame

#![no_main]

use bytes::Buf;
use fusion_proto::{Frame, FrameReader};
use libfuzzer_sys::fuzz_target;

/// Decode until the input runs out or the reader fails.
fn decode_all(chunks: std::slice::Chunks<'_, u8>) -> (Vec<Frame>, bool) {
    let mut reader = FrameReader::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        let mut input = chunk;
        loop {
            match reader.next_frame(&mut input) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(_) => return (frames, true),
            }
        }
        assert!(!input.has_remaining(), "reader stopped before the end of a chunk");
    }
    (frames, false)
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    if rest.is_empty() {
        return;
    }
    let chunk = usize::from(split).max(1);

    let (whole, whole_failed) = decode_all(rest.chunks(rest.len()));
    let (chunked, chunked_failed) = decode_all(rest.chunks(chunk));
    assert_eq!(whole, chunked);
    assert_eq!(whole_failed, chunked_failed);

    for frame in whole {
        let bytes = frame.to_bytes().expect("decoded frames are within limits");
        let mut input = &bytes[..];
        let decoded = FrameReader::new().next_frame(&mut input).expect("re-encoded frame decodes");
        assert_eq!(decoded, Some(frame));
        assert!(!input.has_remaining());
    }
});
