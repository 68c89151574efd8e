#![no_main]

use libfuzzer_sys::fuzz_target;
use stratadb::store::decode::decode_record;

// The record decoder must reject garbage without panicking.
fuzz_target!(|data: &[u8]| {
    let _ = decode_record(data, 1);
});
