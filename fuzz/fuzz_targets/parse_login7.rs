#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::Login7;

fuzz_target!(|data: &[u8]| {
    // Fuzz LOGIN7 parsing as the test server performs it
    let _ = Login7::decode(data);
});
