//! 연결 처리 -- 라인 단위 파싱, 분류, 점수 계산, 결과 적재
//!
//! [`LineProcessor`]는 라인 하나를 끝까지 처리하고 [`LineOutcome`]을 돌려줍니다.
//! [`ConnectionHandler`]는 연결 하나에서 라인을 읽어 프로세서에 넘깁니다.
//!
//! # 처리 흐름
//! ```text
//! line -> parse -> classify -> score (get/put) -> try_enqueue
//!           |         |            |                  |
//!      ParseFailed  Ignored    ScoreFailed         Dropped
//!                ClassifyFailed
//! ```
//!
//! 어떤 라인의 실패도 연결을 닫지 않습니다. 읽기 에러나 EOF만 연결을 끝냅니다.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use driftwatch_core::metrics as m;

use crate::buffer::{DropReason, EnqueueOutcome, ResultBuffer};
use crate::parser::{ParseError, ParseErrorKind, parse_metric_bytes};
use crate::rule::RuleMatcher;
use crate::scorer::Scorer;
use crate::stats::DetectorStats;
use crate::store::StateStore;

/// 라인 하나의 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// 빈 라인 (집계만 하고 무시)
    Blank,
    /// 파싱 실패
    ParseFailed(ParseError),
    /// 감시 대상 아님 (블랙리스트 또는 매칭 규칙 없음)
    Ignored,
    /// 규칙 집합을 가져오지 못해 분류 불가
    ClassifyFailed,
    /// 상태 저장소 실패로 점수 폐기
    ScoreFailed,
    /// 결과 버퍼에 들어감
    Enqueued,
    /// 결과 버퍼 포화로 버려짐
    Dropped(DropReason),
}

impl LineOutcome {
    /// 로그/메트릭용 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blank => "blank",
            Self::ParseFailed(_) => "parse_failed",
            Self::Ignored => "ignored",
            Self::ClassifyFailed => "classify_failed",
            Self::ScoreFailed => "score_failed",
            Self::Enqueued => "enqueued",
            Self::Dropped(_) => "dropped",
        }
    }
}

/// 라인 처리기
///
/// 모든 연결 핸들러가 하나를 공유합니다.
pub struct LineProcessor {
    matcher: Arc<RuleMatcher>,
    scorer: Scorer,
    store: Arc<dyn StateStore>,
    buffer: ResultBuffer,
    stats: Arc<DetectorStats>,
}

impl LineProcessor {
    /// 처리기를 생성합니다.
    pub fn new(
        matcher: Arc<RuleMatcher>,
        scorer: Scorer,
        store: Arc<dyn StateStore>,
        buffer: ResultBuffer,
        stats: Arc<DetectorStats>,
    ) -> Self {
        Self {
            matcher,
            scorer,
            store,
            buffer,
            stats,
        }
    }

    /// 원시 라인 하나를 처리합니다. 줄바꿈 문자는 있어도 없어도 됩니다.
    pub fn process_line(&self, raw: &[u8]) -> LineOutcome {
        metrics::counter!(m::DETECTOR_LINES_RECEIVED_TOTAL).increment(1);
        let outcome = self.evaluate(raw);
        self.stats.record_outcome(&outcome);
        outcome
    }

    /// 파싱 전에 거부된 라인(예: 길이 초과)을 파싱 실패로 집계합니다.
    pub fn reject_line(&self, error: ParseError) -> LineOutcome {
        metrics::counter!(m::DETECTOR_LINES_RECEIVED_TOTAL).increment(1);
        let outcome = self.parse_failed(error);
        self.stats.record_outcome(&outcome);
        outcome
    }

    fn evaluate(&self, raw: &[u8]) -> LineOutcome {
        let line = raw.trim_ascii();
        if line.is_empty() {
            return LineOutcome::Blank;
        }

        let metric = match parse_metric_bytes(line) {
            Ok(metric) => metric,
            Err(e) => return self.parse_failed(e),
        };

        let started = Instant::now();

        let verdict = match self.matcher.classify(&metric.name) {
            Ok(verdict) => verdict,
            Err(e) => {
                metrics::counter!(m::DETECTOR_CLASSIFY_ERRORS_TOTAL).increment(1);
                warn!(name = %metric.name, error = %e, "failed to classify sample, dropped");
                return LineOutcome::ClassifyFailed;
            }
        };
        if !verdict.matched {
            trace!(name = %metric.name, "sample not observed");
            return LineOutcome::Ignored;
        }
        metrics::counter!(m::DETECTOR_SAMPLES_MATCHED_TOTAL).increment(1);

        let (state, scored) = match self.scorer.score(self.store.as_ref(), metric) {
            Ok(result) => result,
            Err(e) => {
                metrics::counter!(m::DETECTOR_SCORE_ERRORS_TOTAL).increment(1);
                warn!(error = %e, "failed to score sample, dropped");
                return LineOutcome::ScoreFailed;
            }
        };

        let elapsed = started.elapsed();
        metrics::histogram!(m::DETECTOR_PROCESSING_DURATION_SECONDS)
            .record(elapsed.as_secs_f64());
        debug!(
            name = %scored.name,
            count = state.count,
            average = scored.average,
            score = scored.score,
            rule_id = verdict.rule.as_ref().map(|r| r.id),
            cost_us = elapsed.as_micros() as u64,
            "sample scored"
        );

        match self.buffer.try_enqueue(scored) {
            EnqueueOutcome::Enqueued => LineOutcome::Enqueued,
            EnqueueOutcome::Dropped(reason) => LineOutcome::Dropped(reason),
        }
    }

    fn parse_failed(&self, error: ParseError) -> LineOutcome {
        metrics::counter!(m::DETECTOR_PARSE_ERRORS_TOTAL).increment(1);
        warn!(error = %error, "failed to parse line, dropped");
        LineOutcome::ParseFailed(error)
    }

    /// 공유 통계
    pub fn stats(&self) -> &Arc<DetectorStats> {
        &self.stats
    }

    /// 결과 버퍼 송신측
    pub fn buffer(&self) -> &ResultBuffer {
        &self.buffer
    }
}

/// 한 번의 라인 읽기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRead {
    /// 라인 하나 (줄바꿈 제외)
    Line,
    /// 최대 길이를 넘어 잘린 라인 (나머지는 버려짐)
    TooLong,
    /// 스트림 종료
    Eof,
}

/// 최대 `max` 바이트까지만 버퍼에 담아 라인 하나를 읽습니다.
///
/// 라인이 더 길면 줄바꿈까지 나머지를 읽어 버리고 [`LineRead::TooLong`]을 반환합니다.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        return Ok(LineRead::Line);
    }

    if buf.len() > max {
        discard_until_newline(reader).await?;
        return Ok(LineRead::TooLong);
    }

    // 줄바꿈 없이 끝난 마지막 라인
    Ok(LineRead::Line)
}

async fn discard_until_newline<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// 연결 종료 요약
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// 처리한 라인 수
    pub lines: u64,
    /// 종료 신호로 닫혔는지 여부
    pub cancelled: bool,
}

/// 연결 핸들러
///
/// 연결마다 [`run`](Self::run)을 별도 태스크로 실행합니다.
#[derive(Clone)]
pub struct ConnectionHandler {
    processor: Arc<LineProcessor>,
    max_line_length: usize,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    /// 핸들러를 생성합니다.
    pub fn new(
        processor: Arc<LineProcessor>,
        max_line_length: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor,
            max_line_length,
            cancel,
        }
    }

    /// 스트림이 끝나거나 읽기 에러가 나거나 종료 신호가 올 때까지 라인을 처리합니다.
    ///
    /// 같은 연결의 라인은 받은 순서대로 처리됩니다.
    pub async fn run<S>(&self, stream: S, peer: &str) -> ConnectionSummary
    where
        S: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::with_capacity(256);
        let mut lines = 0u64;

        loop {
            line.clear();

            let read = tokio::select! {
                result = read_bounded_line(&mut reader, &mut line, self.max_line_length) => result,
                _ = self.cancel.cancelled() => {
                    debug!(peer, lines, "connection handler received shutdown signal");
                    return ConnectionSummary { lines, cancelled: true };
                }
            };

            match read {
                Ok(LineRead::Eof) => {
                    debug!(peer, lines, "connection closed by peer");
                    break;
                }
                Ok(LineRead::Line) => {
                    lines += 1;
                    self.processor.process_line(&line);
                }
                Ok(LineRead::TooLong) => {
                    lines += 1;
                    let error = ParseError::from_bytes(
                        ParseErrorKind::LineTooLong {
                            max: self.max_line_length,
                        },
                        &line,
                    );
                    self.processor.reject_line(error);
                }
                Err(e) => {
                    warn!(peer, lines, error = %e, "connection read error, closing");
                    break;
                }
            }
        }

        ConnectionSummary {
            lines,
            cancelled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use driftwatch_core::types::BaselineState;

    use super::*;
    use crate::buffer::ResultReceiver;
    use crate::error::DetectorError;
    use crate::rule::{Rule, RuleRegistry, RuleSet, RuleSource};
    use crate::store::{MemoryStateStore, StoreError};

    struct Fixture {
        processor: Arc<LineProcessor>,
        rx: ResultReceiver,
        store: Arc<MemoryStateStore>,
    }

    fn fixture(capacity: usize) -> Fixture {
        let registry = Arc::new(RuleRegistry::with_rules(vec![Rule::new(1, "svc.*")]).unwrap());
        let matcher = Arc::new(RuleMatcher::new(&["svc.tmp.*".to_owned()], registry).unwrap());
        let store = Arc::new(MemoryStateStore::new());
        let (buffer, rx) = ResultBuffer::new(capacity).unwrap();
        let processor = Arc::new(LineProcessor::new(
            matcher,
            Scorer::new(0.1, 3).unwrap(),
            store.clone(),
            buffer,
            Arc::new(DetectorStats::new()),
        ));
        Fixture {
            processor,
            rx,
            store,
        }
    }

    #[test]
    fn outcome_per_line_kind() {
        let f = fixture(16);
        assert_eq!(f.processor.process_line(b"\r\n"), LineOutcome::Blank);
        assert!(matches!(
            f.processor.process_line(b"svc.a 1"),
            LineOutcome::ParseFailed(_)
        ));
        assert_eq!(f.processor.process_line(b"db.a 1 1.0"), LineOutcome::Ignored);
        assert_eq!(
            f.processor.process_line(b"svc.tmp.x 1 1.0"),
            LineOutcome::Ignored
        );
        assert_eq!(
            f.processor.process_line(b"svc.a 1 1.0\n"),
            LineOutcome::Enqueued
        );

        let snap = f.processor.stats().snapshot();
        assert_eq!(snap.lines, 5);
        assert_eq!(snap.blank, 1);
        assert_eq!(snap.parse_errors, 1);
        assert_eq!(snap.ignored, 2);
        assert_eq!(snap.enqueued, 1);
        assert_eq!(f.store.get("svc.a").unwrap().map(|s| s.count), Some(1));
    }

    #[test]
    fn full_buffer_drops_without_blocking() {
        let mut f = fixture(1);
        assert_eq!(f.processor.process_line(b"svc.a 1 1.0"), LineOutcome::Enqueued);
        assert_eq!(
            f.processor.process_line(b"svc.a 2 1.0"),
            LineOutcome::Dropped(DropReason::Full)
        );
        // 드롭되어도 상태는 갱신됨
        assert_eq!(f.store.get("svc.a").unwrap().map(|s| s.count), Some(2));
        assert_eq!(f.rx.drain().len(), 1);
    }

    #[tokio::test]
    async fn handler_processes_lines_in_order() {
        let mut f = fixture(16);
        let handler =
            ConnectionHandler::new(f.processor.clone(), 64, CancellationToken::new());

        let input: &[u8] = b"svc.a 1 1.0\nbad\nsvc.a 2 2.0\nsvc.a 3 3.0";
        let summary = handler.run(input, "test").await;
        assert_eq!(summary.lines, 4);
        assert!(!summary.cancelled);

        let stamps: Vec<u64> = f.rx.drain().into_iter().map(|m| m.stamp).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn long_line_is_skipped_and_connection_continues() {
        let mut f = fixture(16);
        let handler = ConnectionHandler::new(f.processor.clone(), 16, CancellationToken::new());

        let long = format!("svc.{} 1 1.0\nsvc.b 2 2.0\n", "x".repeat(100));
        let summary = handler.run(long.as_bytes(), "test").await;
        assert_eq!(summary.lines, 2);

        let received = f.rx.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, "svc.b");
        assert_eq!(f.processor.stats().snapshot().parse_errors, 1);
    }

    #[tokio::test]
    async fn line_of_exactly_max_length_is_accepted() {
        let mut f = fixture(16);
        let line = "svc.ab 1 1.0"; // 12 bytes
        let handler = ConnectionHandler::new(f.processor.clone(), line.len(), CancellationToken::new());
        let input = format!("{line}\n");
        handler.run(input.as_bytes(), "test").await;
        assert_eq!(f.rx.drain().len(), 1);
    }

    /// 첫 번째 규칙 조회만 실패하는 규칙 소스
    struct FlakySource {
        registry: RuleRegistry,
        failed: AtomicBool,
    }

    impl RuleSource for FlakySource {
        fn version(&self) -> Result<u64, DetectorError> {
            self.registry.version()
        }

        fn current_rules(&self) -> Result<Arc<RuleSet>, DetectorError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(DetectorError::RuleSource("backend down".to_owned()));
            }
            self.registry.current_rules()
        }
    }

    /// 특정 이름의 쓰기만 거부하는 저장소
    struct RejectingStore {
        inner: MemoryStateStore,
        reject: &'static str,
    }

    impl StateStore for RejectingStore {
        fn get(&self, name: &str) -> Result<Option<BaselineState>, StoreError> {
            self.inner.get(name)
        }

        fn put(&self, name: &str, state: BaselineState) -> Result<(), StoreError> {
            if name == self.reject {
                return Err(StoreError::Unavailable("disk full".to_owned()));
            }
            self.inner.put(name, state)
        }
    }

    fn processor_with(
        source: Arc<dyn RuleSource>,
        store: Arc<dyn StateStore>,
    ) -> (Arc<LineProcessor>, ResultReceiver) {
        let matcher = Arc::new(RuleMatcher::new(&[], source).unwrap());
        let (buffer, rx) = ResultBuffer::new(16).unwrap();
        let processor = Arc::new(LineProcessor::new(
            matcher,
            Scorer::new(0.1, 3).unwrap(),
            store,
            buffer,
            Arc::new(DetectorStats::new()),
        ));
        (processor, rx)
    }

    #[tokio::test]
    async fn rule_source_failure_drops_only_that_sample() {
        let source = Arc::new(FlakySource {
            registry: RuleRegistry::with_rules(vec![Rule::new(1, "svc.*")]).unwrap(),
            failed: AtomicBool::new(false),
        });
        let (processor, mut rx) = processor_with(source, Arc::new(MemoryStateStore::new()));
        let handler = ConnectionHandler::new(processor.clone(), 64, CancellationToken::new());

        let input: &[u8] = b"svc.a 1 1.0\nsvc.b 2 2.0\n";
        let summary = handler.run(input, "test").await;
        assert_eq!(summary.lines, 2);

        let received = rx.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, "svc.b");

        let snap = processor.stats().snapshot();
        assert_eq!(snap.classify_errors, 1);
        assert_eq!(snap.enqueued, 1);
    }

    #[tokio::test]
    async fn store_failure_drops_only_that_sample() {
        let registry = Arc::new(RuleRegistry::with_rules(vec![Rule::new(1, "svc.*")]).unwrap());
        let store = Arc::new(RejectingStore {
            inner: MemoryStateStore::new(),
            reject: "svc.broken",
        });
        let (processor, mut rx) = processor_with(registry, store.clone());
        let handler = ConnectionHandler::new(processor.clone(), 64, CancellationToken::new());

        let input: &[u8] = b"svc.broken 1 1.0\nsvc.ok 2 2.0\n";
        let summary = handler.run(input, "test").await;
        assert_eq!(summary.lines, 2);

        let received = rx.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, "svc.ok");

        let snap = processor.stats().snapshot();
        assert_eq!(snap.score_errors, 1);
        assert_eq!(snap.enqueued, 1);
        assert_eq!(store.get("svc.broken").unwrap(), None);
        assert_eq!(store.get("svc.ok").unwrap().map(|s| s.count), Some(1));
    }

    #[tokio::test]
    async fn cancellation_stops_idle_connection() {
        let f = fixture(16);
        let cancel = CancellationToken::new();
        let handler = ConnectionHandler::new(f.processor.clone(), 64, cancel.clone());

        let (client, server) = tokio::io::duplex(64);
        let task = tokio::spawn(async move { handler.run(server, "test").await });
        cancel.cancel();

        let summary = task.await.unwrap();
        assert!(summary.cancelled);
        drop(client);
    }
}
