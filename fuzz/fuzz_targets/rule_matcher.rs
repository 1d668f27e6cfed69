#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use driftwatch_detector::rule::GlobPattern;
use driftwatch_detector::{Rule, RuleMatcher, RuleRegistry};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 규칙 패턴 (최대 8개)
    patterns: Vec<String>,
    /// 블랙리스트 패턴 (최대 4개)
    blacklist: Vec<String>,
    /// 분류할 메트릭 이름
    names: Vec<String>,
}

fuzz_target!(|input: FuzzInput| {
    let rules: Vec<Rule> = input
        .patterns
        .iter()
        .take(8)
        .zip(1u64..)
        .map(|(pattern, id)| Rule::new(id, pattern.clone()))
        .collect();
    let blacklist: Vec<String> = input.blacklist.into_iter().take(4).collect();

    // 잘못된 패턴은 에러로 거부되어야 하며 패닉은 안 됨
    let Ok(registry) = RuleRegistry::with_rules(rules) else {
        return;
    };
    let Ok(matcher) = RuleMatcher::new(&blacklist, Arc::new(registry)) else {
        return;
    };
    let compiled_blacklist: Vec<GlobPattern> = blacklist
        .iter()
        .filter_map(|p| GlobPattern::compile(p).ok())
        .collect();

    for name in input.names.iter().take(16) {
        let first = matcher.classify(name).expect("registry never fails");
        // 캐시된 판정은 처음 판정과 같아야 함
        let second = matcher.classify(name).expect("registry never fails");
        assert_eq!(first.matched, second.matched);

        if compiled_blacklist.iter().any(|p| p.matches(name)) {
            assert!(!first.matched);
        }
    }
});
