#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::TokenParser;

fuzz_target!(|data: &[u8]| {
    // Fuzz login response token parsing
    let bytes = Bytes::copy_from_slice(data);
    let mut parser = TokenParser::new(bytes);

    while let Ok(Some(_)) = parser.next_token() {}
});
