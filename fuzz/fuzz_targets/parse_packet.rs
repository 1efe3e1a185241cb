#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::{PACKET_HEADER_SIZE, PacketHeader};

fuzz_target!(|data: &[u8]| {
    // Fuzz packet header parsing
    if data.len() >= PACKET_HEADER_SIZE {
        let mut cursor = data;
        if let Ok(header) = PacketHeader::decode(&mut cursor) {
            let _ = header.payload_length();
        }
    }
});
