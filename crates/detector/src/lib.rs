//! Driftwatch 탐지기 -- 메트릭 수신, 규칙 매칭, 이상 점수 계산
//!
//! 업스트림 수집기가 TCP로 보내는 메트릭 샘플을 라인 단위로 받아,
//! 감시 대상이면 메트릭별 EWMA 베이스라인과 비교해 점수를 매기고
//! 유한 결과 버퍼에 적재합니다.
//!
//! # 아키텍처
//! ```text
//! Listener -> ConnectionHandler -> parser -> RuleMatcher (RuleCache, RuleSource)
//!                                         -> Scorer (StateStore)
//!                                         -> ResultBuffer -> ResultReceiver
//! ```
//!
//! # 모듈 구성
//! - [`parser`]: 라인 파서
//! - [`rule`]: glob 규칙, 판정 캐시, 매처, YAML 로더
//! - [`scorer`]: Cold/Warm EWMA 점수 계산기
//! - [`store`]: 베이스라인 상태 저장소 trait과 인메모리 구현
//! - [`buffer`]: 드롭 집계가 있는 비차단 결과 버퍼
//! - [`connection`]: 라인 처리기와 연결 핸들러
//! - [`server`]: 리스너, 생명주기, 빌더
//! - [`stats`]: 처리 통계
//! - [`config`]: 탐지기 설정
//! - [`error`]: 에러 타입

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod parser;
pub mod rule;
pub mod scorer;
pub mod server;
pub mod stats;
pub mod store;

pub use buffer::{DropReason, EnqueueOutcome, ResultBuffer, ResultReceiver};
pub use config::{DetectorConfig, DetectorConfigBuilder};
pub use connection::{ConnectionHandler, LineOutcome, LineProcessor};
pub use error::DetectorError;
pub use parser::{ParseError, ParseErrorKind, parse_metric};
pub use rule::{Rule, RuleCache, RuleLoader, RuleMatcher, RuleRegistry, RuleSet, RuleSource, Verdict};
pub use scorer::{MAX_SCORE, NEUTRAL_SCORE, Phase, Scorer};
pub use server::{Detector, DetectorBuilder};
pub use stats::{DetectorStats, StatsSnapshot};
pub use store::{MemoryStateStore, StateStore, StoreError};
