#![no_main]

use driftwatch_detector::parser::{PARSE_EXCERPT_LIMIT, parse_metric_bytes};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // 어떤 입력이든 패닉 없이 Ok 또는 Err
    match parse_metric_bytes(data) {
        Ok(metric) => {
            assert!(metric.value.is_finite());
            assert!(!metric.name.is_empty());
        }
        Err(e) => assert!(e.excerpt.len() <= PARSE_EXCERPT_LIMIT),
    }
});
