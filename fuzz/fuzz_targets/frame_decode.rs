//! Arbitrary bytes through the frame decoder.
//!
//! Decoding must never panic, and a decoded frame must re-encode to exactly
//! the bytes it consumed.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use relaygate_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let mut rest = data;
    while let Ok(Some((frame, used))) = Frame::decode(rest) {
        let mut out = BytesMut::new();
        frame.encode(&mut out).expect("decoded frame re-encodes");
        assert_eq!(&out[..], &rest[..used]);
        rest = &rest[used..];
    }
});
