//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `driftwatch_`
//! - 모듈명: `detector_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 드롭/실패 사유 레이블 키
pub const LABEL_REASON: &str = "reason";

// ─── Detector 메트릭 ────────────────────────────────────────────────

/// Detector: 수신한 전체 라인 수 (counter)
pub const DETECTOR_LINES_RECEIVED_TOTAL: &str = "driftwatch_detector_lines_received_total";

/// Detector: 파싱 실패 수 (counter)
pub const DETECTOR_PARSE_ERRORS_TOTAL: &str = "driftwatch_detector_parse_errors_total";

/// Detector: 규칙에 매칭된 샘플 수 (counter)
pub const DETECTOR_SAMPLES_MATCHED_TOTAL: &str = "driftwatch_detector_samples_matched_total";

/// Detector: 규칙 분류 실패 수 (counter)
pub const DETECTOR_CLASSIFY_ERRORS_TOTAL: &str = "driftwatch_detector_classify_errors_total";

/// Detector: 점수 계산/상태 저장 실패 수 (counter)
pub const DETECTOR_SCORE_ERRORS_TOTAL: &str = "driftwatch_detector_score_errors_total";

/// Detector: 결과 버퍼에 들어간 샘플 수 (counter)
pub const DETECTOR_RESULTS_ENQUEUED_TOTAL: &str = "driftwatch_detector_results_enqueued_total";

/// Detector: 버퍼 포화로 드롭된 샘플 수 (counter, label: reason)
pub const DETECTOR_RESULTS_DROPPED_TOTAL: &str = "driftwatch_detector_results_dropped_total";

/// Detector: 연결 수 제한으로 거부된 연결 수 (counter)
pub const DETECTOR_CONNECTIONS_REJECTED_TOTAL: &str =
    "driftwatch_detector_connections_rejected_total";

/// Detector: 현재 활성 연결 수 (gauge)
pub const DETECTOR_ACTIVE_CONNECTIONS: &str = "driftwatch_detector_active_connections";

/// Detector: 결과 버퍼에 대기 중인 샘플 수 (gauge)
pub const DETECTOR_BUFFER_LENGTH: &str = "driftwatch_detector_buffer_length";

/// Detector: 규칙 캐시 무효화 횟수 (counter)
pub const DETECTOR_RULE_CACHE_INVALIDATIONS_TOTAL: &str =
    "driftwatch_detector_rule_cache_invalidations_total";

/// Detector: 샘플 하나의 처리 지연 시간 (histogram, 초)
pub const DETECTOR_PROCESSING_DURATION_SECONDS: &str =
    "driftwatch_detector_processing_duration_seconds";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "driftwatch_daemon_uptime_seconds";

/// Daemon: 현재 로드된 규칙 수 (gauge)
pub const DAEMON_RULES_LOADED: &str = "driftwatch_daemon_rules_loaded";

/// Daemon: 소비자가 관측한 이상치 수 (counter)
pub const DAEMON_ANOMALIES_TOTAL: &str = "driftwatch_daemon_anomalies_total";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 샘플 처리 지연 시간 히스토그램 버킷 (초)
///
/// 10us ~ 100ms 범위, 핫패스는 서브 밀리초가 목표
pub const PROCESSING_DURATION_BUCKETS: [f64; 9] = [
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        DETECTOR_LINES_RECEIVED_TOTAL,
        "Total number of lines read from all connections"
    );
    describe_counter!(
        DETECTOR_PARSE_ERRORS_TOTAL,
        "Total number of lines rejected by the metric parser"
    );
    describe_counter!(
        DETECTOR_SAMPLES_MATCHED_TOTAL,
        "Total number of samples matched by a monitoring rule"
    );
    describe_counter!(
        DETECTOR_CLASSIFY_ERRORS_TOTAL,
        "Total number of samples dropped because the rule set could not be fetched"
    );
    describe_counter!(
        DETECTOR_SCORE_ERRORS_TOTAL,
        "Total number of samples dropped because of state store failures"
    );
    describe_counter!(
        DETECTOR_RESULTS_ENQUEUED_TOTAL,
        "Total number of scored samples handed to the result buffer"
    );
    describe_counter!(
        DETECTOR_RESULTS_DROPPED_TOTAL,
        "Total number of scored samples shed because the result buffer was full"
    );
    describe_counter!(
        DETECTOR_CONNECTIONS_REJECTED_TOTAL,
        "Total number of connections closed because of the connection limit"
    );
    describe_gauge!(
        DETECTOR_ACTIVE_CONNECTIONS,
        "Number of currently open metric connections"
    );
    describe_gauge!(
        DETECTOR_BUFFER_LENGTH,
        "Number of scored samples waiting in the result buffer"
    );
    describe_counter!(
        DETECTOR_RULE_CACHE_INVALIDATIONS_TOTAL,
        "Total number of rule cache flushes caused by rule set changes"
    );
    describe_histogram!(
        DETECTOR_PROCESSING_DURATION_SECONDS,
        "Time to classify and score a single sample in seconds"
    );

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Driftwatch daemon uptime in seconds");
    describe_gauge!(DAEMON_RULES_LOADED, "Number of monitoring rules loaded");
    describe_counter!(
        DAEMON_ANOMALIES_TOTAL,
        "Total number of anomalous samples observed by the result consumer"
    );
}
