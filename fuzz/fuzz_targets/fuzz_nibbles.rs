#![no_main]

use libfuzzer_sys::fuzz_target;
use stratadb::data::Nibbles;

fuzz_target!(|data: &[u8]| {
    // Compact decoding must never panic and must round-trip whatever it
    // accepted.
    let path = Nibbles::from_compact(data);
    let reencoded = Nibbles::from_compact(&path.to_compact());
    assert_eq!(path, reencoded);

    // Unpacking arbitrary bytes round-trips through packing.
    let unpacked = Nibbles::unpack(data);
    assert_eq!(unpacked.pack(), data);
    assert_eq!(unpacked.len(), data.len() * 2);
});
