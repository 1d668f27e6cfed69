//! 도메인 타입 -- 시스템 전역에서 사용되는 공통 타입
//!
//! 탐지기와 다운스트림 소비자가 주고받는 데이터 구조를 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 메트릭 샘플
///
/// 입력 라인 하나에서 파싱되며, `name`/`stamp`/`value`는 생성 후 변하지 않습니다.
/// `average`와 `score`는 스코어러가 결과 버퍼로 넘기기 전에 한 번만 채웁니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// 메트릭 이름 (예: `svc.latency`)
    pub name: String,
    /// 타임스탬프 (Unix epoch 초)
    pub stamp: u64,
    /// 관측값
    pub value: f64,
    /// 갱신 후 평활 평균
    pub average: f64,
    /// 편차 점수 (3-sigma 정규화, 부호 포함)
    pub score: f64,
}

impl Metric {
    /// 점수가 채워지지 않은 새 샘플을 생성합니다.
    pub fn new(name: impl Into<String>, stamp: u64, value: f64) -> Self {
        Self {
            name: name.into(),
            stamp,
            value,
            average: 0.0,
            score: 0.0,
        }
    }

    /// 와이어 형식(`<name> <stamp> <value>`)으로 직렬화합니다.
    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.name, self.stamp, self.value)
    }

    /// 3-sigma 범위를 벗어났는지 확인합니다.
    pub fn is_anomalous(&self) -> bool {
        self.score.abs() >= 1.0
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} value={} average={:.3} score={:.3}",
            self.name, self.value, self.average, self.score,
        )
    }
}

/// 메트릭별 베이스라인 상태
///
/// 외부 상태 저장소가 소유하며, 탐지기는 샘플마다 읽고-계산하고-씁니다.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BaselineState {
    /// 지금까지 관측한 샘플 수
    pub count: u64,
    /// 지수 가중 평균
    pub average: f64,
    /// 지수 가중 분산 (항상 0 이상)
    pub variance: f64,
}

impl BaselineState {
    /// 표준편차를 반환합니다.
    pub fn stddev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_to_line() {
        let m = Metric::new("svc.latency", 1_700_000_000, 12.5);
        assert_eq!(m.to_line(), "svc.latency 1700000000 12.5");
    }

    #[test]
    fn anomaly_threshold_is_symmetric() {
        let mut m = Metric::new("a", 0, 0.0);
        m.score = -1.2;
        assert!(m.is_anomalous());
        m.score = 0.99;
        assert!(!m.is_anomalous());
    }

    #[test]
    fn stddev_of_zero_state() {
        assert_eq!(BaselineState::default().stddev(), 0.0);
        let s = BaselineState {
            count: 3,
            average: 1.0,
            variance: 4.0,
        };
        assert_eq!(s.stddev(), 2.0);
    }

    #[test]
    fn metric_serializes_to_json() {
        let m = Metric::new("a.b", 10, 1.5);
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"name\":\"a.b\""));
        let back: Metric = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
