//! 메트릭 라인 파서
//!
//! 와이어 형식은 공백으로 구분된 세 필드입니다.
//!
//! ```text
//! <name> <stamp> <value>
//! svc.latency 1700000000 12.5
//! ```
//!
//! - `name`: 비어 있지 않은 토큰 (공백 없음)
//! - `stamp`: 부호 없는 정수 (Unix epoch 초)
//! - `value`: 유한한 실수
//!
//! 파싱은 모든 입력에 대해 전역적(total)입니다. 어떤 바이트열이 와도
//! 패닉 없이 [`Metric`] 또는 [`ParseError`]를 반환합니다.

use std::fmt;

use driftwatch_core::types::Metric;

/// 에러 메시지에 포함할 원본 라인의 최대 바이트 수
pub const PARSE_EXCERPT_LIMIT: usize = 32;

/// 파싱 실패 종류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// 필드 개수가 3이 아님
    FieldCount {
        /// 실제 필드 개수
        found: usize,
    },
    /// 타임스탬프가 부호 없는 정수가 아님
    InvalidStamp,
    /// 값이 실수가 아님
    InvalidValue,
    /// 값이 NaN 또는 무한대
    NonFiniteValue,
    /// UTF-8이 아닌 입력
    InvalidUtf8,
    /// 최대 라인 길이 초과
    LineTooLong {
        /// 허용 최대 길이
        max: usize,
    },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldCount { found } => write!(f, "expected 3 fields, found {found}"),
            Self::InvalidStamp => write!(f, "timestamp is not an unsigned integer"),
            Self::InvalidValue => write!(f, "value is not a number"),
            Self::NonFiniteValue => write!(f, "value is not finite"),
            Self::InvalidUtf8 => write!(f, "line is not valid utf-8"),
            Self::LineTooLong { max } => write!(f, "line exceeds {max} bytes"),
        }
    }
}

/// 라인 파싱 실패
///
/// 진단용으로 원본 라인의 앞부분(최대 [`PARSE_EXCERPT_LIMIT`] 바이트)을 담습니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: '{excerpt}'")]
pub struct ParseError {
    /// 실패 종류
    pub kind: ParseErrorKind,
    /// 잘린 원본 라인
    pub excerpt: String,
}

impl ParseError {
    /// 라인 텍스트에서 에러를 생성합니다.
    pub fn new(kind: ParseErrorKind, line: &str) -> Self {
        Self {
            kind,
            excerpt: excerpt(line).to_owned(),
        }
    }

    /// 원시 바이트에서 에러를 생성합니다 (손실 변환).
    pub fn from_bytes(kind: ParseErrorKind, raw: &[u8]) -> Self {
        let head = &raw[..raw.len().min(PARSE_EXCERPT_LIMIT)];
        Self::new(kind, &String::from_utf8_lossy(head))
    }
}

/// 문자 경계를 지키며 라인을 [`PARSE_EXCERPT_LIMIT`] 바이트 이하로 자릅니다.
fn excerpt(line: &str) -> &str {
    if line.len() <= PARSE_EXCERPT_LIMIT {
        return line;
    }
    let mut end = PARSE_EXCERPT_LIMIT;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// 한 라인을 [`Metric`]으로 파싱합니다.
///
/// 앞뒤 공백과 CR/LF는 무시합니다. 필드 구분자는 하나 이상의 ASCII 공백입니다.
pub fn parse_metric(line: &str) -> Result<Metric, ParseError> {
    let mut fields = line.split_ascii_whitespace();
    let (Some(name), Some(stamp), Some(value), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        let found = line.split_ascii_whitespace().count();
        return Err(ParseError::new(ParseErrorKind::FieldCount { found }, line));
    };

    let stamp = stamp
        .parse::<u64>()
        .map_err(|_| ParseError::new(ParseErrorKind::InvalidStamp, line))?;

    let value = value
        .parse::<f64>()
        .map_err(|_| ParseError::new(ParseErrorKind::InvalidValue, line))?;
    if !value.is_finite() {
        return Err(ParseError::new(ParseErrorKind::NonFiniteValue, line));
    }

    Ok(Metric::new(name, stamp, value))
}

/// 원시 바이트 라인을 파싱합니다. UTF-8이 아니면 실패합니다.
pub fn parse_metric_bytes(raw: &[u8]) -> Result<Metric, ParseError> {
    match std::str::from_utf8(raw) {
        Ok(line) => parse_metric(line),
        Err(_) => Err(ParseError::from_bytes(ParseErrorKind::InvalidUtf8, raw)),
    }
}
