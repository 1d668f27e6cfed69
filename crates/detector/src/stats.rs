//! 탐지기 처리 통계
//!
//! [`DetectorStats`]는 모든 연결 핸들러가 공유하는 원자적 카운터입니다.
//! 전역 메트릭 레코더 설치 여부와 무관하게 프로세스 안에서 조회할 수 있습니다.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::connection::LineOutcome;

/// 라인/연결 단위 누적 카운터
#[derive(Debug, Default)]
pub struct DetectorStats {
    lines: AtomicU64,
    blank: AtomicU64,
    parse_errors: AtomicU64,
    ignored: AtomicU64,
    classify_errors: AtomicU64,
    score_errors: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    active_connections: AtomicU64,
}

impl DetectorStats {
    /// 0으로 초기화된 통계를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 라인 하나의 처리 결과를 집계합니다.
    pub fn record_outcome(&self, outcome: &LineOutcome) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            LineOutcome::Blank => &self.blank,
            LineOutcome::ParseFailed(_) => &self.parse_errors,
            LineOutcome::Ignored => &self.ignored,
            LineOutcome::ClassifyFailed => &self.classify_errors,
            LineOutcome::ScoreFailed => &self.score_errors,
            LineOutcome::Enqueued => &self.enqueued,
            LineOutcome::Dropped(_) => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 연결 수락을 기록합니다.
    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// 연결 종료를 기록합니다.
    pub fn connection_closed(&self) {
        // 0 아래로 내려가지 않도록
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// 연결 수 제한으로 거부된 연결을 기록합니다.
    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// 현재 값의 스냅샷
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            blank: self.blank.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            classify_errors: self.classify_errors.load(Ordering::Relaxed),
            score_errors: self.score_errors.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}

/// [`DetectorStats`]의 특정 시점 값
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// 읽은 전체 라인 수
    pub lines: u64,
    /// 빈 라인 수
    pub blank: u64,
    /// 파싱 실패 수
    pub parse_errors: u64,
    /// 감시 대상이 아닌 샘플 수
    pub ignored: u64,
    /// 분류 실패 수
    pub classify_errors: u64,
    /// 점수 계산/저장 실패 수
    pub score_errors: u64,
    /// 결과 버퍼에 들어간 샘플 수
    pub enqueued: u64,
    /// 결과 버퍼에서 버려진 샘플 수
    pub dropped: u64,
    /// 수락한 연결 수
    pub connections_accepted: u64,
    /// 거부한 연결 수
    pub connections_rejected: u64,
    /// 현재 활성 연결 수
    pub active_connections: u64,
}

impl StatsSnapshot {
    /// 감시 대상으로 매칭된 샘플 수
    pub fn matched(&self) -> u64 {
        self.score_errors + self.enqueued + self.dropped
    }
}
