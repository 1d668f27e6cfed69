//! 탐지기 에러 타입
//!
//! [`DetectorError`]는 탐지기 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<DetectorError> for DriftwatchError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 라인 단위 파싱 실패는 [`ParseError`](crate::parser::ParseError),
//! 상태 저장소 실패는 [`StoreError`](crate::store::StoreError)로 따로 표현합니다.

use driftwatch_core::error::{DriftwatchError, PipelineError};

use crate::store::StoreError;

/// 탐지기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// 리슨 소켓 바인드 실패 (서비스 전체에 치명적)
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// 바인드 주소
        addr: String,
        /// 실패 사유
        reason: String,
    },

    /// 복구 불가능한 accept 실패 (서비스 전체에 치명적)
    #[error("accept failed: {0}")]
    Accept(String),

    /// 규칙 집합 조회 실패
    #[error("rule source error: {0}")]
    RuleSource(String),

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: rule {rule_id}: {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 ID
        rule_id: u64,
        /// 검증 실패 사유
        reason: String,
    },

    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 상태 저장소 에러
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// 점수 계산에 쓸 수 없는 샘플
    #[error("invalid sample '{name}': {reason}")]
    InvalidSample {
        /// 메트릭 이름
        name: String,
        /// 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectorError {
    /// 서비스 전체를 중단시켜야 하는 에러인지 확인합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Accept(_))
    }
}

impl From<DetectorError> for DriftwatchError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::Io(e) => DriftwatchError::Io(e),
            e if e.is_fatal() => DriftwatchError::Pipeline(PipelineError::Fatal(e.to_string())),
            e => DriftwatchError::Pipeline(PipelineError::InitFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_is_fatal() {
        let err = DetectorError::Bind {
            addr: "0.0.0.0:2015".to_owned(),
            reason: "address in use".to_owned(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("0.0.0.0:2015"));

        let converted: DriftwatchError = err.into();
        assert!(matches!(
            converted,
            DriftwatchError::Pipeline(PipelineError::Fatal(_))
        ));
    }

    #[test]
    fn store_error_is_not_fatal() {
        let err = DetectorError::from(StoreError::Unavailable("disk full".to_owned()));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn rule_validation_display() {
        let err = DetectorError::RuleValidation {
            rule_id: 7,
            reason: "pattern must not be empty".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rule 7"));
        assert!(msg.contains("pattern must not be empty"));
    }

    #[test]
    fn io_error_keeps_io_variant() {
        let err = DetectorError::Io(std::io::Error::other("boom"));
        let converted: DriftwatchError = err.into();
        assert!(matches!(converted, DriftwatchError::Io(_)));
    }
}
