//! 이름별 판정 캐시
//!
//! [`RuleCache`]는 메트릭 이름마다 마지막 판정 결과를 저장합니다.
//! 모든 항목은 하나의 규칙 집합 버전에 묶여 있으며, 버전이 바뀌면
//! 쓰기 락 하나로 캐시 전체를 비웁니다.
//!
//! 조회는 읽기 락만 잡으므로 여러 연결 핸들러가 동시에 수행할 수 있고,
//! 무효화는 드문 배타적 연산입니다.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use driftwatch_core::metrics as m;

use super::types::Rule;

/// 기본 최대 캐시 항목 수 (메모리 성장 제한)
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 1_000_000;

/// 메트릭 이름 하나에 대한 판정
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// 감시 대상 여부
    pub matched: bool,
    /// 매칭된 규칙 (matched일 때만 존재)
    pub rule: Option<Arc<Rule>>,
}

impl Verdict {
    /// 감시 대상이 아님
    pub fn unmatched() -> Self {
        Self {
            matched: false,
            rule: None,
        }
    }

    /// 규칙에 매칭됨
    pub fn matched(rule: Arc<Rule>) -> Self {
        Self {
            matched: true,
            rule: Some(rule),
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    /// 현재 항목들이 유효한 규칙 집합 버전
    version: Option<u64>,
    entries: HashMap<String, Verdict>,
}

/// 규칙 판정 캐시
#[derive(Debug)]
pub struct RuleCache {
    inner: RwLock<CacheInner>,
    max_entries: usize,
}

impl RuleCache {
    /// 기본 용량 제한으로 생성합니다.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_CACHE_ENTRIES)
    }

    /// 최대 항목 수를 지정하여 생성합니다.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            max_entries,
        }
    }

    /// 이름에 대한 캐시된 판정을 조회합니다.
    pub fn lookup(&self, name: &str) -> Option<Verdict> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(name).cloned()
    }

    /// 판정을 기록합니다.
    ///
    /// 캐시의 현재 버전이 `version`과 다르면 (그 사이 무효화가 일어났으면)
    /// 기록하지 않고 `false`를 반환합니다. 용량이 가득 찬 경우에도 기록하지 않습니다.
    pub fn record(&self, version: u64, name: &str, verdict: Verdict) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.version != Some(version) {
            return false;
        }
        if inner.entries.len() >= self.max_entries && !inner.entries.contains_key(name) {
            tracing::debug!(
                max_entries = self.max_entries,
                name,
                "rule cache full, verdict not cached"
            );
            return false;
        }
        inner.entries.insert(name.to_owned(), verdict);
        true
    }

    /// 더 새로운 버전 토큰을 보면 캐시 전체를 비우고 그 버전으로 넘어갑니다.
    ///
    /// 토큰은 단조 증가합니다. 현재 버전 이하의 토큰은 항목을 건드리지 않으므로
    /// 늦게 도착한 핸들러가 캐시를 이전 버전으로 되돌리지 못합니다.
    /// 실제로 항목이 버려졌으면 `true`를 반환합니다.
    pub fn invalidate_if_stale(&self, version: u64) -> bool {
        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if !is_newer(inner.version, version) {
                return false;
            }
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // 락을 다시 잡는 사이 다른 핸들러가 먼저 갱신했을 수 있음
        if !is_newer(inner.version, version) {
            return false;
        }

        let previous = inner.version.replace(version);
        let flushed = inner.entries.len();
        inner.entries.clear();

        if previous.is_some() {
            metrics::counter!(m::DETECTOR_RULE_CACHE_INVALIDATIONS_TOTAL).increment(1);
            tracing::debug!(?previous, current = version, flushed, "rule cache invalidated");
            true
        } else {
            false
        }
    }

    /// 현재 캐시된 이름 수
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 캐시가 따르는 규칙 집합 버전
    pub fn version(&self) -> Option<u64> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).version
    }
}

fn is_newer(current: Option<u64>, version: u64) -> bool {
    current.is_none_or(|v| version > v)
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}
