//! Arbitrary payloads through the packet reader.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relaygate_proto::{Location, Packet};

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::read(data) {
        let again = packet.marshal().expect("decoded packet re-encodes");
        assert!(Packet::read(&again).is_ok());
    }
    let _ = Location::from_bytes(data);
});
