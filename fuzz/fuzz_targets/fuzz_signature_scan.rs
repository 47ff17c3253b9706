#![no_main]

use cryptsift_core::signatures::SignatureSet;
use libfuzzer_sys::fuzz_target;

// The first byte picks a chunk size; the report must not depend on it.
fuzz_target!(|data: &[u8]| {
    let Some((&split, body)) = data.split_first() else {
        return;
    };
    let Ok(set) = SignatureSet::builtin() else {
        return;
    };

    let mut whole = set.scanner(usize::MAX);
    whole.feed(body);

    let mut chunked = set.scanner(usize::MAX);
    for piece in body.chunks(usize::from(split).max(1)) {
        chunked.feed(piece);
    }

    assert_eq!(whole.finish(), chunked.finish());
});
