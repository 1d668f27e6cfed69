//! 규칙 파일 로더 -- YAML 규칙 목록을 디스크에서 로드합니다.
//!
//! 규칙 파일 하나에 규칙 목록 전체가 들어 있으며, 파일 내 순서가 곧
//! 매칭 우선순위입니다.
//!
//! ```yaml
//! - id: 1
//!   pattern: "svc.*.latency"
//!   trend_up: true
//! - id: 2
//!   pattern: "db.*"
//! ```

use std::path::Path;

use crate::error::DetectorError;

use super::types::Rule;

const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_RULES_COUNT: usize = 10_000;

/// 규칙 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// YAML 파일에서 규칙 목록을 로드합니다.
    ///
    /// # Errors
    /// - 파일을 읽을 수 없거나 너무 큰 경우
    /// - YAML 파싱 또는 규칙 검증에 실패한 경우
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<Rule>, DetectorError> {
        let path = path.as_ref();
        let source = path.display().to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| DetectorError::RuleLoad {
                path: source.clone(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(DetectorError::RuleLoad {
                path: source,
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| DetectorError::RuleLoad {
                    path: source.clone(),
                    reason: format!("failed to read file: {e}"),
                })?;

        let rules = Self::parse_yaml(&content, &source)?;
        tracing::info!(path = %source, count = rules.len(), "loaded monitoring rules");
        Ok(rules)
    }

    /// YAML 문자열을 규칙 목록으로 파싱하고 각 규칙을 검증합니다.
    ///
    /// 빈 문서는 빈 목록입니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<Vec<Rule>, DetectorError> {
        if yaml_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rules: Vec<Rule> =
            serde_yaml::from_str(yaml_str).map_err(|e| DetectorError::RuleLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;

        if rules.len() > MAX_RULES_COUNT {
            return Err(DetectorError::RuleLoad {
                path: source.to_owned(),
                reason: format!("too many rules: max {MAX_RULES_COUNT}"),
            });
        }

        for rule in &rules {
            rule.validate()?;
        }

        Ok(rules)
    }
}
