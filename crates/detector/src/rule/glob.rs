//! 메트릭 이름 glob 패턴
//!
//! - `*`: 빈 문자열과 `.`을 포함한 임의의 문자열
//! - `?`: 정확히 한 문자
//! - 그 외 문자는 리터럴
//!
//! 이름 전체가 패턴과 일치해야 합니다. 패턴은 생성 시 한 번만
//! 앵커된 정규식으로 컴파일합니다.

use std::fmt;

use regex::Regex;

/// 컴파일된 glob 패턴
#[derive(Clone)]
pub struct GlobPattern {
    raw: String,
    regex: Regex,
}

impl GlobPattern {
    /// glob 문자열을 컴파일합니다.
    ///
    /// # Errors
    /// 패턴이 비어 있으면 실패합니다.
    pub fn compile(pattern: &str) -> Result<Self, String> {
        if pattern.is_empty() {
            return Err("pattern must not be empty".to_owned());
        }

        let mut source = String::with_capacity(pattern.len() * 2 + 2);
        source.push('^');
        let mut literal = [0u8; 4];
        for ch in pattern.chars() {
            match ch {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                c => source.push_str(&regex::escape(c.encode_utf8(&mut literal))),
            }
        }
        source.push('$');

        // (?s): '.'이 줄바꿈 문자에도 매칭되도록
        let regex = Regex::new(&format!("(?s){source}"))
            .map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;

        Ok(Self {
            raw: pattern.to_owned(),
            regex,
        })
    }

    /// 이름이 패턴과 일치하는지 확인합니다.
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// 원본 glob 문자열
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Debug for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobPattern").field(&self.raw).finish()
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
