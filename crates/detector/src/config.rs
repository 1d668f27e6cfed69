//! 탐지기 설정
//!
//! [`DetectorConfig`]는 core의 [`DetectorSection`](driftwatch_core::config::DetectorSection)을
//! 기반으로 탐지기 런타임에 필요한 값만 담습니다.
//!
//! # 사용 예시
//! ```ignore
//! use driftwatch_core::config::DriftwatchConfig;
//! use driftwatch_detector::config::DetectorConfig;
//!
//! let core_config = DriftwatchConfig::default();
//! let config = DetectorConfig::from_core(&core_config.detector);
//! ```

use serde::{Deserialize, Serialize};

use driftwatch_core::config::DetectorSection;

use crate::buffer::MAX_BUFFER_CAPACITY;
use crate::error::DetectorError;

const MAX_LINE_LENGTH: usize = 1024 * 1024;
const MAX_CONNECTIONS: usize = 65_536;

/// 탐지기 런타임 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// 바인드 주소 (`host:port`)
    pub bind_addr: String,
    /// 블랙리스트 glob 패턴
    pub blacklist: Vec<String>,
    /// 지수 평활 계수
    pub smoothing_factor: f64,
    /// Warm 전환 최소 샘플 수
    pub min_count: u64,
    /// 결과 버퍼 용량
    pub buffer_capacity: usize,
    /// 한 라인의 최대 바이트 수
    pub max_line_length: usize,
    /// 최대 동시 연결 수
    pub max_connections: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from_core(&DetectorSection::default())
    }
}

impl DetectorConfig {
    /// core 설정에서 탐지기 설정을 생성합니다.
    pub fn from_core(core: &DetectorSection) -> Self {
        Self {
            bind_addr: format_bind_addr(&core.bind_host, core.port),
            blacklist: core.blacklist.clone(),
            smoothing_factor: core.smoothing_factor,
            min_count: core.min_count,
            buffer_capacity: core.buffer_capacity,
            max_line_length: core.max_line_length,
            max_connections: core.max_connections,
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.bind_addr.is_empty() {
            return Err(config_error("bind_addr", "must not be empty".to_owned()));
        }

        let factor = self.smoothing_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(config_error(
                "smoothing_factor",
                format!("must be in (0, 1], got {factor}"),
            ));
        }

        if self.min_count == 0 {
            return Err(config_error("min_count", "must be greater than 0".to_owned()));
        }

        if self.buffer_capacity == 0 || self.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(config_error(
                "buffer_capacity",
                format!("must be 1-{MAX_BUFFER_CAPACITY}"),
            ));
        }

        if self.max_line_length == 0 || self.max_line_length > MAX_LINE_LENGTH {
            return Err(config_error(
                "max_line_length",
                format!("must be 1-{MAX_LINE_LENGTH}"),
            ));
        }

        if self.max_connections == 0 || self.max_connections > MAX_CONNECTIONS {
            return Err(config_error(
                "max_connections",
                format!("must be 1-{MAX_CONNECTIONS}"),
            ));
        }

        if let Some(pattern) = self.blacklist.iter().find(|p| p.trim().is_empty()) {
            return Err(config_error(
                "blacklist",
                format!("empty pattern '{pattern}' is not allowed"),
            ));
        }

        Ok(())
    }
}

/// IPv6 호스트는 대괄호로 감쌉니다.
fn format_bind_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn config_error(field: &str, reason: String) -> DetectorError {
    DetectorError::Config {
        field: field.to_owned(),
        reason,
    }
}

/// 탐지기 설정 빌더
#[derive(Default)]
pub struct DetectorConfigBuilder {
    config: DetectorConfig,
}

impl DetectorConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 바인드 주소를 설정합니다.
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// 블랙리스트 패턴을 설정합니다.
    pub fn blacklist(mut self, patterns: Vec<String>) -> Self {
        self.config.blacklist = patterns;
        self
    }

    /// 평활 계수를 설정합니다.
    pub fn smoothing_factor(mut self, factor: f64) -> Self {
        self.config.smoothing_factor = factor;
        self
    }

    /// Warm 전환 최소 샘플 수를 설정합니다.
    pub fn min_count(mut self, count: u64) -> Self {
        self.config.min_count = count;
        self
    }

    /// 결과 버퍼 용량을 설정합니다.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// 최대 라인 길이를 설정합니다.
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.config.max_line_length = max;
        self
    }

    /// 최대 동시 연결 수를 설정합니다.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<DetectorConfig, DetectorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
