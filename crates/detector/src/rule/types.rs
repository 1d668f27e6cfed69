//! 감시 규칙 데이터 타입
//!
//! YAML 규칙 파일에서 역직렬화되는 [`Rule`]과, 패턴을 미리 컴파일해 둔
//! 불변 스냅샷 [`RuleSet`]을 정의합니다.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

use super::glob::GlobPattern;

/// 감시 규칙
///
/// 탐지기는 `pattern`만 해석합니다. 추세/임계값 파라미터는
/// 다운스트림 알림 평가기를 위해 그대로 전달됩니다.
///
/// # YAML 스키마
/// ```yaml
/// - id: 1
///   pattern: "svc.*.latency"
///   description: service latency
///   trend_up: true
///   threshold_max: 500.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// 규칙 고유 ID
    pub id: u64,
    /// 메트릭 이름 glob 패턴
    pub pattern: String,
    /// 규칙 설명
    #[serde(default)]
    pub description: String,
    /// 상승 추세 알림 여부
    #[serde(default)]
    pub trend_up: bool,
    /// 하강 추세 알림 여부
    #[serde(default)]
    pub trend_down: bool,
    /// 절대 상한 임계값
    #[serde(default)]
    pub threshold_max: Option<f64>,
    /// 절대 하한 임계값
    #[serde(default)]
    pub threshold_min: Option<f64>,
}

impl Rule {
    /// 패턴만 가진 규칙을 생성합니다.
    pub fn new(id: u64, pattern: impl Into<String>) -> Self {
        Self {
            id,
            pattern: pattern.into(),
            description: String::new(),
            trend_up: false,
            trend_down: false,
            threshold_max: None,
            threshold_min: None,
        }
    }

    /// 규칙의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DetectorError> {
        let fail = |reason: &str| DetectorError::RuleValidation {
            rule_id: self.id,
            reason: reason.to_owned(),
        };

        if self.pattern.trim().is_empty() {
            return Err(fail("pattern must not be empty"));
        }
        if self.pattern.chars().any(char::is_whitespace) {
            return Err(fail("pattern must not contain whitespace"));
        }

        for threshold in [self.threshold_max, self.threshold_min].into_iter().flatten() {
            if !threshold.is_finite() {
                return Err(fail("thresholds must be finite"));
            }
        }
        if let (Some(max), Some(min)) = (self.threshold_max, self.threshold_min) {
            if min > max {
                return Err(fail("threshold_min must not exceed threshold_max"));
            }
        }

        Ok(())
    }
}

/// 규칙 집합의 불변 스냅샷
///
/// 생성 시 모든 패턴을 한 번 컴파일합니다. 규칙 순서는 보존되며
/// 매칭 시 먼저 정의된 규칙이 우선합니다.
#[derive(Debug)]
pub struct RuleSet {
    version: u64,
    entries: Vec<(Arc<Rule>, GlobPattern)>,
}

impl RuleSet {
    /// 규칙 목록을 검증하고 컴파일합니다.
    ///
    /// 하나라도 잘못된 규칙이 있으면 집합 전체를 거부합니다.
    pub fn new(version: u64, rules: Vec<Rule>) -> Result<Self, DetectorError> {
        let mut seen_ids = HashSet::with_capacity(rules.len());
        let mut entries = Vec::with_capacity(rules.len());

        for rule in rules {
            rule.validate()?;
            if !seen_ids.insert(rule.id) {
                return Err(DetectorError::RuleValidation {
                    rule_id: rule.id,
                    reason: "duplicate rule id".to_owned(),
                });
            }
            let pattern = GlobPattern::compile(&rule.pattern).map_err(|reason| {
                DetectorError::RuleValidation {
                    rule_id: rule.id,
                    reason,
                }
            })?;
            entries.push((Arc::new(rule), pattern));
        }

        Ok(Self { version, entries })
    }

    /// 빈 규칙 집합
    pub fn empty(version: u64) -> Self {
        Self {
            version,
            entries: Vec::new(),
        }
    }

    /// 버전 토큰
    pub fn version(&self) -> u64 {
        self.version
    }

    /// 규칙 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 정의 순서대로 규칙을 순회합니다.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.entries.iter().map(|(rule, _)| rule)
    }

    /// 이름에 매칭되는 첫 번째 규칙을 찾습니다.
    pub fn first_match(&self, name: &str) -> Option<&Arc<Rule>> {
        self.entries
            .iter()
            .find(|(_, pattern)| pattern.matches(name))
            .map(|(rule, _)| rule)
    }
}
