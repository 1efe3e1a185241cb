#![no_main]

use libfuzzer_sys::fuzz_target;
use mssql_connect::transport::ssrp;

fuzz_target!(|data: &[u8]| {
    // Browser answers come from an unauthenticated UDP peer
    let _ = ssrp::parse_instance_response(data);
    let _ = ssrp::parse_dac_response(data);
});
