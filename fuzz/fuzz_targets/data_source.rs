#![no_main]

use libfuzzer_sys::fuzz_target;
use mssql_connect::DataSource;

fuzz_target!(|data: &[u8]| {
    // A descriptor that parses must survive its canonical form
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(parsed) = DataSource::parse(s) {
            let _ = DataSource::parse(&parsed.canonical());
        }
    }
});
