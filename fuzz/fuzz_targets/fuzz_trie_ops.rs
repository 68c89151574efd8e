#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use stratadb::{keccak256, MemoryStore, ReferenceTrie, VersionedTrie};

// Interprets the input as a script of inserts and removals and checks the
// engine against the conventional trie after every operation batch.
fuzz_target!(|data: &[u8]| {
    let mut trie = VersionedTrie::new_empty(b"s".to_vec(), Arc::new(MemoryStore::new()), 0);
    let mut reference = ReferenceTrie::new();

    for chunk in data.chunks(3).take(256) {
        let key = keccak256(chunk).0;
        if chunk.len() == 3 && chunk[0] & 1 == 1 {
            // Remove a key derived from the same stream, hitting both
            // present and absent paths.
            let target = keccak256(&chunk[1..]).0;
            trie.remove(&target).unwrap();
            reference.remove(&target);
        } else {
            let value = vec![chunk.first().copied().unwrap_or(1).max(1); 2];
            trie.update(&key, &value).unwrap();
            reference.insert(&key, value);
        }
    }

    assert_eq!(trie.hash().unwrap(), reference.root_hash());
});
