//! 규칙 매칭 -- 캐시, 블랙리스트, 규칙 집합 순서의 판정
//!
//! [`RuleMatcher`]는 샘플 하나가 감시 대상인지 판정합니다.
//!
//! 1. 규칙 집합 버전 토큰을 확인하고 바뀌었으면 캐시를 비움
//! 2. 캐시에 판정이 있으면 즉시 반환
//! 3. 블랙리스트 패턴에 걸리면 `unmatched`로 기록 후 반환
//! 4. 규칙 집합 스냅샷을 가져와 다시 버전 확인
//! 5. 정의 순서상 첫 번째로 매칭되는 규칙을 기록 후 반환 (없으면 `unmatched`)

use std::sync::Arc;

use driftwatch_core::types::Metric;

use crate::error::DetectorError;

use super::RuleSource;
use super::cache::{RuleCache, Verdict};
use super::glob::GlobPattern;

/// 규칙 매처
pub struct RuleMatcher {
    /// 컴파일된 블랙리스트 패턴
    blacklist: Vec<GlobPattern>,
    /// 공유 판정 캐시
    cache: Arc<RuleCache>,
    /// 규칙 관리 협력자
    source: Arc<dyn RuleSource>,
}

impl RuleMatcher {
    /// 블랙리스트 패턴을 컴파일하여 매처를 생성합니다.
    pub fn new(blacklist: &[String], source: Arc<dyn RuleSource>) -> Result<Self, DetectorError> {
        Self::with_cache(blacklist, source, Arc::new(RuleCache::new()))
    }

    /// 외부에서 만든 캐시를 공유하는 매처를 생성합니다.
    pub fn with_cache(
        blacklist: &[String],
        source: Arc<dyn RuleSource>,
        cache: Arc<RuleCache>,
    ) -> Result<Self, DetectorError> {
        let blacklist = blacklist
            .iter()
            .map(|p| {
                GlobPattern::compile(p).map_err(|reason| DetectorError::Config {
                    field: "detector.blacklist".to_owned(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            blacklist,
            cache,
            source,
        })
    }

    /// 메트릭 이름을 분류합니다.
    ///
    /// # Errors
    /// 규칙 관리 협력자에서 버전 또는 규칙 집합을 가져오지 못하면 실패합니다.
    pub fn classify(&self, name: &str) -> Result<Verdict, DetectorError> {
        let version = self.source.version()?;
        self.cache.invalidate_if_stale(version);

        if let Some(verdict) = self.cache.lookup(name) {
            return Ok(verdict);
        }

        if let Some(pattern) = self.blacklist.iter().find(|p| p.matches(name)) {
            tracing::trace!(name, pattern = %pattern, "blacklisted");
            self.cache.record(version, name, Verdict::unmatched());
            return Ok(Verdict::unmatched());
        }

        let rules = self.source.current_rules()?;
        let version = rules.version();
        self.cache.invalidate_if_stale(version);

        let verdict = match rules.first_match(name) {
            Some(rule) => Verdict::matched(Arc::clone(rule)),
            None => Verdict::unmatched(),
        };
        self.cache.record(version, name, verdict.clone());
        Ok(verdict)
    }

    /// 샘플이 감시 대상인지 확인합니다.
    pub fn matches(&self, metric: &Metric) -> Result<bool, DetectorError> {
        self.classify(&metric.name).map(|v| v.matched)
    }

    /// 공유 캐시
    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    /// 블랙리스트 패턴 수
    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::rule::{Rule, RuleRegistry, RuleSet};

    fn matcher(blacklist: &[&str], rules: Vec<Rule>) -> (RuleMatcher, Arc<RuleRegistry>) {
        let registry = Arc::new(RuleRegistry::with_rules(rules).unwrap());
        let blacklist: Vec<String> = blacklist.iter().map(|s| (*s).to_owned()).collect();
        let matcher = RuleMatcher::new(&blacklist, registry.clone()).unwrap();
        (matcher, registry)
    }

    /// 규칙 집합 조회 횟수를 세는 소스
    struct CountingSource {
        inner: RuleRegistry,
        fetches: AtomicUsize,
    }

    impl RuleSource for CountingSource {
        fn version(&self) -> Result<u64, DetectorError> {
            self.inner.version()
        }

        fn current_rules(&self) -> Result<Arc<RuleSet>, DetectorError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            self.inner.current_rules()
        }
    }

    struct FailingSource;

    impl RuleSource for FailingSource {
        fn version(&self) -> Result<u64, DetectorError> {
            Ok(1)
        }

        fn current_rules(&self) -> Result<Arc<RuleSet>, DetectorError> {
            Err(DetectorError::RuleSource("backend down".to_owned()))
        }
    }

    #[test]
    fn blacklist_beats_whitelist_and_is_cached() {
        let (matcher, _) = matcher(&["foo.*"], vec![Rule::new(1, "*")]);

        let verdict = matcher.classify("foo.bar").unwrap();
        assert!(!verdict.matched);
        assert_eq!(matcher.cache().lookup("foo.bar"), Some(Verdict::unmatched()));

        assert!(matcher.classify("svc.latency").unwrap().matched);
    }

    #[test]
    fn first_matching_rule_wins() {
        let (matcher, _) = matcher(
            &[],
            vec![
                Rule::new(1, "svc.*.p99"),
                Rule::new(2, "svc.*"),
                Rule::new(3, "svc.api.p99"),
            ],
        );

        for _ in 0..3 {
            let verdict = matcher.classify("svc.api.p99").unwrap();
            assert_eq!(verdict.rule.map(|r| r.id), Some(1));
        }
        let verdict = matcher.classify("svc.api.p50").unwrap();
        assert_eq!(verdict.rule.map(|r| r.id), Some(2));
    }

    #[test]
    fn unmatched_names_are_cached_too() {
        let (matcher, _) = matcher(&[], vec![Rule::new(1, "svc.*")]);
        assert!(!matcher.classify("db.qps").unwrap().matched);
        assert_eq!(matcher.cache().lookup("db.qps"), Some(Verdict::unmatched()));
    }

    #[test]
    fn cached_names_skip_rule_fetch() {
        let source = Arc::new(CountingSource {
            inner: RuleRegistry::with_rules(vec![Rule::new(1, "svc.*")]).unwrap(),
            fetches: AtomicUsize::new(0),
        });
        let matcher = RuleMatcher::new(&[], source.clone()).unwrap();

        for _ in 0..10 {
            assert!(matcher.classify("svc.a").unwrap().matched);
        }
        assert_eq!(source.fetches.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn rule_change_invalidates_cached_verdicts() {
        let (matcher, registry) = matcher(&[], vec![Rule::new(1, "svc.*")]);
        assert!(matcher.classify("svc.a").unwrap().matched);
        assert!(!matcher.classify("db.a").unwrap().matched);

        registry.replace(vec![Rule::new(2, "db.*")]).unwrap();

        assert!(!matcher.classify("svc.a").unwrap().matched);
        let verdict = matcher.classify("db.a").unwrap();
        assert_eq!(verdict.rule.map(|r| r.id), Some(2));
    }

    #[test]
    fn rule_fetch_failure_is_error_and_not_cached() {
        let matcher = RuleMatcher::new(&[], Arc::new(FailingSource)).unwrap();
        assert!(matcher.classify("svc.a").is_err());
        assert!(matcher.cache().lookup("svc.a").is_none());
    }

    #[test]
    fn blacklist_does_not_need_rule_fetch() {
        let blacklist = vec!["tmp.*".to_owned()];
        let matcher = RuleMatcher::new(&blacklist, Arc::new(FailingSource)).unwrap();
        assert!(!matcher.classify("tmp.x").unwrap().matched);
    }

    #[test]
    fn invalid_blacklist_pattern_is_config_error() {
        let registry: Arc<dyn RuleSource> = Arc::new(RuleRegistry::new());
        let result = RuleMatcher::new(&[String::new()], registry);
        assert!(matches!(result, Err(DetectorError::Config { .. })));
    }

    #[test]
    fn matches_uses_metric_name() {
        let (matcher, _) = matcher(&[], vec![Rule::new(1, "svc.*")]);
        assert!(matcher.matches(&Metric::new("svc.x", 1, 1.0)).unwrap());
        assert!(!matcher.matches(&Metric::new("other", 1, 1.0)).unwrap());
    }
}
