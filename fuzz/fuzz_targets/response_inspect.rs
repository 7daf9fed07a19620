#![no_main]

use libfuzzer_sys::fuzz_target;

use condproxy::proxy::inspect::{header_block, is_not_modified, status_code, validation_token};

fuzz_target!(|data: &[u8]| {
    let _ = status_code(data);
    let _ = is_not_modified(data);
    if let Some(token) = validation_token(data) {
        assert!(header_block(data).is_some());
        assert!(!token.is_empty());
    }
});
