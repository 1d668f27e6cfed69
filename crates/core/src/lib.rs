//! Driftwatch 공통 크레이트
//!
//! 탐지기(`driftwatch-detector`)와 데몬(`driftwatch-daemon`)이 공유하는
//! 에러 타입, 설정, 도메인 타입, 메트릭 이름, 생명주기 trait을 정의합니다.
//!
//! # 모듈 구성
//!
//! - [`config`]: `driftwatch.toml` 파싱 및 환경변수 오버라이드
//! - [`error`]: 최상위 에러 타입
//! - [`metrics`]: Prometheus 메트릭 이름 상수
//! - [`pipeline`]: 모듈 생명주기 trait 및 헬스 상태
//! - [`types`]: 메트릭 샘플, 베이스라인 상태

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, DriftwatchError, PipelineError};

// 설정
pub use config::DriftwatchConfig;

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};

// 도메인 타입
pub use types::{BaselineState, Metric};
