//! 이상 점수 계산 -- EWMA 베이스라인 상태 기계
//!
//! 메트릭 이름마다 [`BaselineState`](샘플 수, 지수 가중 평균, 지수 가중 분산)를
//! 유지하며, 새 샘플이 이전 베이스라인에서 얼마나 벗어났는지를 점수로 냅니다.
//!
//! # 상태
//! - **Cold**: 이전 샘플 수가 `min_count` 미만. 점수는 항상 [`NEUTRAL_SCORE`]
//! - **Warm**: 이전 샘플 수가 `min_count` 이상. 점수는 `(v - μ) / (3σ)`
//!
//! 샘플 수는 감소하지 않으므로 Warm에서 Cold로 돌아가지 않습니다.
//!
//! # 갱신식 (α = smoothing factor)
//! ```text
//! d   = v - μ
//! μ'  = μ + α·d
//! σ²' = max(0, (1 - α)·(σ² + α·d²))
//! ```
//! 점수는 항상 갱신 전 μ, σ로 계산합니다.

use driftwatch_core::types::{BaselineState, Metric};

use crate::error::DetectorError;
use crate::store::{StateStore, StoreError};

/// 이상 판정을 내리지 않는 점수
pub const NEUTRAL_SCORE: f64 = 0.0;

/// 점수 절댓값 상한 (분산이 0일 때의 편차 포함)
pub const MAX_SCORE: f64 = 1_000.0;

/// 분산/편차를 0으로 간주하는 상대 허용 오차
const ZERO_TOLERANCE: f64 = 1e-9;

/// 베이스라인 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 이력 부족
    Cold,
    /// 점수 산출 가능
    Warm,
}

/// EWMA 이상 점수 계산기
#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    smoothing_factor: f64,
    min_count: u64,
}

impl Scorer {
    /// 평활 계수와 Warm 전환 최소 샘플 수로 생성합니다.
    ///
    /// # Errors
    /// `smoothing_factor`가 (0, 1] 밖이거나 `min_count`가 0이면 실패합니다.
    pub fn new(smoothing_factor: f64, min_count: u64) -> Result<Self, DetectorError> {
        if !(smoothing_factor > 0.0 && smoothing_factor <= 1.0) {
            return Err(DetectorError::Config {
                field: "smoothing_factor".to_owned(),
                reason: format!("must be in (0, 1], got {smoothing_factor}"),
            });
        }
        if min_count == 0 {
            return Err(DetectorError::Config {
                field: "min_count".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(Self {
            smoothing_factor,
            min_count,
        })
    }

    /// 평활 계수
    pub fn smoothing_factor(&self) -> f64 {
        self.smoothing_factor
    }

    /// Warm 전환 최소 샘플 수
    pub fn min_count(&self) -> u64 {
        self.min_count
    }

    /// 이전 상태 기준으로 다음 샘플이 어느 단계에서 점수가 매겨지는지 반환합니다.
    pub fn phase(&self, prev: Option<&BaselineState>) -> Phase {
        match prev {
            Some(state) if state.count >= self.min_count => Phase::Warm,
            _ => Phase::Cold,
        }
    }

    /// 이전 상태와 새 샘플로 다음 상태와 점수가 매겨진 샘플을 계산합니다.
    ///
    /// 순수 함수입니다. 저장은 호출자가 합니다.
    pub fn next(&self, prev: Option<&BaselineState>, mut metric: Metric) -> (BaselineState, Metric) {
        let value = metric.value;

        let Some(prev) = prev else {
            metric.average = value;
            metric.score = NEUTRAL_SCORE;
            let state = BaselineState {
                count: 1,
                average: value,
                variance: 0.0,
            };
            return (state, metric);
        };

        let score = match self.phase(Some(prev)) {
            Phase::Cold => NEUTRAL_SCORE,
            Phase::Warm => deviation(prev, value),
        };

        let alpha = self.smoothing_factor;
        let diff = value - prev.average;
        let average = prev.average + alpha * diff;
        let variance = ((1.0 - alpha) * (prev.variance + alpha * diff * diff)).max(0.0);

        // 극단적인 입력에서 오버플로우가 나면 유한한 값으로 되돌림
        let state = BaselineState {
            count: prev.count.saturating_add(1),
            average: if average.is_finite() { average } else { value },
            variance: if variance.is_finite() {
                variance
            } else {
                f64::MAX
            },
        };

        metric.average = state.average;
        metric.score = score;
        (state, metric)
    }

    /// 저장소에서 이전 상태를 읽고, 점수를 계산하고, 새 상태를 씁니다.
    ///
    /// 읽기-계산-쓰기는 [`StateStore::update`] 한 번으로 이루어집니다.
    ///
    /// 저장에 실패하면 점수도 버려집니다.
    pub fn score(
        &self,
        store: &dyn StateStore,
        metric: Metric,
    ) -> Result<(BaselineState, Metric), DetectorError> {
        if !metric.value.is_finite() {
            return Err(DetectorError::InvalidSample {
                name: metric.name,
                reason: "value is not finite".to_owned(),
            });
        }

        let name = metric.name.clone();
        let mut scored = None;
        let state = store.update(&name, &mut |prev| {
            if let Some(ref state) = prev {
                check_state(&name, state)?;
            }
            let (state, out) = self.next(prev.as_ref(), metric.clone());
            scored = Some(out);
            Ok(state)
        })?;

        let scored = scored.ok_or_else(|| {
            StoreError::Unavailable(format!("store did not apply update for '{name}'"))
        })?;
        Ok((state, scored))
    }
}

/// 3-sigma 정규화 편차 (부호 포함, ±[`MAX_SCORE`]로 제한)
fn deviation(prev: &BaselineState, value: f64) -> f64 {
    let diff = value - prev.average;
    let sigma = prev.stddev();
    let tolerance = ZERO_TOLERANCE * prev.average.abs().max(value.abs()).max(1.0);

    if sigma <= tolerance {
        if diff.abs() <= tolerance {
            NEUTRAL_SCORE
        } else {
            MAX_SCORE.copysign(diff)
        }
    } else {
        (diff / (3.0 * sigma)).clamp(-MAX_SCORE, MAX_SCORE)
    }
}

fn check_state(name: &str, state: &BaselineState) -> Result<(), StoreError> {
    let corrupt = |reason: &str| StoreError::Corrupt {
        key: name.to_owned(),
        reason: reason.to_owned(),
    };
    if state.count == 0 {
        return Err(corrupt("count is zero"));
    }
    if !state.average.is_finite() {
        return Err(corrupt("average is not finite"));
    }
    if !state.variance.is_finite() || state.variance < 0.0 {
        return Err(corrupt("variance is negative or not finite"));
    }
    Ok(())
}
