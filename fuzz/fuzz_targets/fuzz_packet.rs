#![no_main]

use libfuzzer_sys::fuzz_target;
use pgnet_client::protocol::{decode_packet, encode_packet, MetaCommand};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(packet) = decode_packet(frame) {
        let _ = MetaCommand::parse(&packet.message);
        let _ = encode_packet(&packet);
    }
});
