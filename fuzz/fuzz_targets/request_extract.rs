#![no_main]

use libfuzzer_sys::fuzz_target;

use condproxy::proxy::request::{RequestShape, classify, extract};

fuzz_target!(|data: &[u8]| {
    let _ = classify(data);
    for shape in [
        RequestShape::Auto,
        RequestShape::RawLine,
        RequestShape::RequestLine,
    ] {
        if let Ok(request) = extract(data, shape) {
            assert!(request.url.starts_with("http://"));
            assert!(!request.host().is_empty());
        }
    }
});
