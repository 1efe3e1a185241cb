#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::PreLogin;

fuzz_target!(|data: &[u8]| {
    // PRELOGIN responses arrive before any encryption is negotiated
    let bytes = Bytes::copy_from_slice(data);
    if let Ok(prelogin) = PreLogin::decode(bytes) {
        let _ = PreLogin::decode(prelogin.encode());
    }
});
