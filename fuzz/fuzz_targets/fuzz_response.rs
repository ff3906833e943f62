#![no_main]

use libfuzzer_sys::fuzz_target;
use pgnet_client::protocol::{decode_response, encode_response};
use pgnet_client::GameDirectory;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(response) = decode_response(frame) else {
        return;
    };
    // Anything that decodes must encode again.
    let _ = encode_response(&response);
    let _ = GameDirectory::from_response(&response);
});
