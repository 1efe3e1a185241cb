#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::{EnvChange, FedAuthInfo};

fuzz_target!(|data: &[u8]| {
    // ENVCHANGE carries routing targets; FEDAUTHINFO carries STS URLs
    let mut bytes = Bytes::copy_from_slice(data);
    let _ = EnvChange::decode(&mut bytes);
    let mut bytes = Bytes::copy_from_slice(data);
    let _ = FedAuthInfo::decode(&mut bytes);
});
