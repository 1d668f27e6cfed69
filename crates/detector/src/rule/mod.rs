//! 감시 규칙 -- glob 패턴 기반 메트릭 분류
//!
//! 메트릭 이름을 블랙리스트와 규칙 집합에 대조하여 감시 대상인지 판정합니다.
//!
//! # 아키텍처
//! - [`RuleSource`]: 현재 규칙 집합과 버전 토큰을 제공하는 협력자
//! - [`RuleRegistry`]: 프로세스 내 [`RuleSource`] 구현
//! - [`RuleCache`]: 이름별 판정 캐시 (버전 토큰으로 무효화)
//! - [`RuleMatcher`]: 캐시 -> 블랙리스트 -> 규칙 집합 순서의 판정기
//! - [`RuleLoader`]: YAML 규칙 파일 로더

pub mod cache;
pub mod glob;
pub mod loader;
pub mod matcher;
pub mod types;

pub use cache::{RuleCache, Verdict};
pub use glob::GlobPattern;
pub use loader::RuleLoader;
pub use matcher::RuleMatcher;
pub use types::{Rule, RuleSet};

use std::sync::{Arc, RwLock};

use crate::error::DetectorError;

/// 규칙 관리 협력자
///
/// 탐지기는 불변 스냅샷만 읽습니다. 내용이 바뀌면 버전 토큰은 반드시 증가해야 하며,
/// 이전 값으로 돌아가는 토큰은 캐시 무효화를 일으키지 않습니다.
pub trait RuleSource: Send + Sync {
    /// 현재 규칙 집합의 버전 토큰을 반환합니다 (전체 스캔 없이).
    fn version(&self) -> Result<u64, DetectorError>;

    /// 현재 규칙 집합 스냅샷을 반환합니다.
    fn current_rules(&self) -> Result<Arc<RuleSet>, DetectorError>;
}

/// 프로세스 내 규칙 저장소
///
/// [`replace`](Self::replace)마다 버전이 단조 증가합니다.
#[derive(Debug)]
pub struct RuleRegistry {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleRegistry {
    /// 빈 규칙 집합(버전 0)으로 생성합니다.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSet::empty(0))),
        }
    }

    /// 초기 규칙으로 생성합니다 (버전 1).
    pub fn with_rules(rules: Vec<Rule>) -> Result<Self, DetectorError> {
        Ok(Self {
            current: RwLock::new(Arc::new(RuleSet::new(1, rules)?)),
        })
    }

    /// 규칙 집합 전체를 교체하고 새 버전을 반환합니다.
    ///
    /// 검증에 실패하면 기존 집합을 그대로 유지합니다.
    pub fn replace(&self, rules: Vec<Rule>) -> Result<u64, DetectorError> {
        let mut current = self
            .current
            .write()
            .map_err(|_| DetectorError::RuleSource("rule registry lock poisoned".to_owned()))?;
        let version = current.version() + 1;
        let set = RuleSet::new(version, rules)?;
        tracing::info!(version, rules = set.len(), "rule set replaced");
        *current = Arc::new(set);
        Ok(version)
    }

    /// 현재 규칙 수
    pub fn rule_count(&self) -> usize {
        self.current.read().map(|s| s.len()).unwrap_or_default()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleSource for RuleRegistry {
    fn version(&self) -> Result<u64, DetectorError> {
        self.current
            .read()
            .map(|s| s.version())
            .map_err(|_| DetectorError::RuleSource("rule registry lock poisoned".to_owned()))
    }

    fn current_rules(&self) -> Result<Arc<RuleSet>, DetectorError> {
        self.current
            .read()
            .map(|s| Arc::clone(&*s))
            .map_err(|_| DetectorError::RuleSource("rule registry lock poisoned".to_owned()))
    }
}
