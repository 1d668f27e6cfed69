//! 설정 관리 -- driftwatch.toml 파싱 및 런타임 설정
//!
//! [`DriftwatchConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`DRIFTWATCH_DETECTOR_PORT=2015` 형식)
//! 3. 설정 파일 (`driftwatch.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), driftwatch_core::error::DriftwatchError> {
//! use driftwatch_core::config::DriftwatchConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = DriftwatchConfig::load("driftwatch.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = DriftwatchConfig::parse("[detector]\nport = 2015")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, DriftwatchError};

/// Driftwatch 통합 설정
///
/// `driftwatch.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftwatchConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 탐지기 설정
    #[serde(default)]
    pub detector: DetectorSection,
    /// 메트릭 노출 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl DriftwatchConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DriftwatchError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, DriftwatchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DriftwatchError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                DriftwatchError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, DriftwatchError> {
        toml::from_str(toml_str).map_err(|e| {
            DriftwatchError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `DRIFTWATCH_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "DRIFTWATCH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "DRIFTWATCH_GENERAL_LOG_FORMAT");

        // Detector
        override_string(&mut self.detector.bind_host, "DRIFTWATCH_DETECTOR_BIND_HOST");
        override_u16(&mut self.detector.port, "DRIFTWATCH_DETECTOR_PORT");
        override_csv(&mut self.detector.blacklist, "DRIFTWATCH_DETECTOR_BLACKLIST");
        override_f64(
            &mut self.detector.smoothing_factor,
            "DRIFTWATCH_DETECTOR_SMOOTHING_FACTOR",
        );
        override_u64(&mut self.detector.min_count, "DRIFTWATCH_DETECTOR_MIN_COUNT");
        override_usize(
            &mut self.detector.buffer_capacity,
            "DRIFTWATCH_DETECTOR_BUFFER_CAPACITY",
        );
        override_usize(
            &mut self.detector.max_line_length,
            "DRIFTWATCH_DETECTOR_MAX_LINE_LENGTH",
        );
        override_usize(
            &mut self.detector.max_connections,
            "DRIFTWATCH_DETECTOR_MAX_CONNECTIONS",
        );
        override_string(&mut self.detector.rules_path, "DRIFTWATCH_DETECTOR_RULES_PATH");
        override_u64(
            &mut self.detector.rule_reload_secs,
            "DRIFTWATCH_DETECTOR_RULE_RELOAD_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "DRIFTWATCH_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "DRIFTWATCH_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "DRIFTWATCH_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DriftwatchError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.detector.bind_host.is_empty() {
            return Err(invalid("detector.bind_host", "must not be empty".to_owned()));
        }

        // 0 < factor <= 1, NaN은 비교가 모두 false이므로 함께 걸러짐
        let factor = self.detector.smoothing_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(invalid(
                "detector.smoothing_factor",
                format!("must be in (0, 1], got {factor}"),
            ));
        }

        if self.detector.min_count == 0 {
            return Err(invalid(
                "detector.min_count",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.detector.buffer_capacity == 0 {
            return Err(invalid(
                "detector.buffer_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.detector.max_line_length == 0 {
            return Err(invalid(
                "detector.max_line_length",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.detector.max_connections == 0 {
            return Err(invalid(
                "detector.max_connections",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(invalid(
                "metrics.endpoint",
                "only '/metrics' is supported".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> DriftwatchError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 탐지기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    /// 바인드 호스트
    pub bind_host: String,
    /// 수신 TCP 포트 (0이면 OS가 할당)
    pub port: u16,
    /// 블랙리스트 glob 패턴
    pub blacklist: Vec<String>,
    /// 지수 평활 계수 (새 샘플 가중치, 0 < α <= 1)
    pub smoothing_factor: f64,
    /// Warm 전환에 필요한 최소 샘플 수
    pub min_count: u64,
    /// 결과 버퍼 용량
    pub buffer_capacity: usize,
    /// 한 라인의 최대 바이트 수
    pub max_line_length: usize,
    /// 최대 동시 연결 수
    pub max_connections: usize,
    /// 규칙 YAML 파일 경로 (빈 문자열이면 규칙 없음)
    pub rules_path: String,
    /// 규칙 파일 리로드 주기 (초, 0이면 비활성)
    pub rule_reload_secs: u64,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_owned(),
            port: 2015,
            blacklist: Vec::new(),
            smoothing_factor: 0.05,
            min_count: 30,
            buffer_capacity: 10 * 1024,
            max_line_length: 4096,
            max_connections: 1024,
            rules_path: String::new(),
            rule_reload_secs: 30,
        }
    }
}

/// 메트릭 노출 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 스크랩 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9102,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_f64(target: &mut f64, env_key: &str) {
    override_parsed(target, env_key, "f64");
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
