//! 결과 버퍼 -- 점수가 매겨진 샘플의 유한 큐
//!
//! [`ResultBuffer`]는 여러 연결 핸들러가 공유하는 송신측이고,
//! [`ResultReceiver`]는 다운스트림 소비자가 가져가는 수신측입니다.
//!
//! # 오버플로우 정책
//! 큐가 가득 차면 새 샘플을 버립니다. 생산자는 절대 대기하지 않으며,
//! 모든 드롭은 카운터와 경고 로그로 남습니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use driftwatch_core::metrics as m;
use driftwatch_core::types::Metric;

use crate::error::DetectorError;

/// 최대 버퍼 용량
pub const MAX_BUFFER_CAPACITY: usize = 10_000_000;

/// 드롭 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 큐가 가득 참
    Full,
    /// 수신측이 닫힘
    Closed,
}

impl DropReason {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

/// 비차단 enqueue 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 큐에 들어감
    Enqueued,
    /// 버려짐
    Dropped(DropReason),
}

#[derive(Debug, Default)]
struct BufferCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// 결과 버퍼 송신측
///
/// 복제 비용이 낮으며 모든 복제본이 같은 큐와 카운터를 공유합니다.
#[derive(Debug, Clone)]
pub struct ResultBuffer {
    tx: mpsc::Sender<Metric>,
    capacity: usize,
    counters: Arc<BufferCounters>,
}

impl ResultBuffer {
    /// 지정 용량의 버퍼와 수신측을 생성합니다.
    ///
    /// # Errors
    /// 용량이 0이거나 [`MAX_BUFFER_CAPACITY`]를 초과하면 실패합니다.
    pub fn new(capacity: usize) -> Result<(Self, ResultReceiver), DetectorError> {
        if capacity == 0 || capacity > MAX_BUFFER_CAPACITY {
            return Err(DetectorError::Config {
                field: "buffer_capacity".to_owned(),
                reason: format!("must be between 1 and {MAX_BUFFER_CAPACITY}, got {capacity}"),
            });
        }

        let (tx, rx) = mpsc::channel(capacity);
        let buffer = Self {
            tx,
            capacity,
            counters: Arc::new(BufferCounters::default()),
        };
        Ok((buffer, ResultReceiver { rx }))
    }

    /// 대기 없이 샘플을 넣어 봅니다. 실패하면 드롭으로 집계합니다.
    pub fn try_enqueue(&self, metric: Metric) -> EnqueueOutcome {
        match self.tx.try_send(metric) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::DETECTOR_RESULTS_ENQUEUED_TOTAL).increment(1);
                EnqueueOutcome::Enqueued
            }
            Err(err) => {
                let (reason, metric) = match err {
                    TrySendError::Full(metric) => (DropReason::Full, metric),
                    TrySendError::Closed(metric) => (DropReason::Closed, metric),
                };
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!(
                    m::DETECTOR_RESULTS_DROPPED_TOTAL,
                    m::LABEL_REASON => reason.as_str()
                )
                .increment(1);
                tracing::warn!(
                    name = %metric.name,
                    reason = reason.as_str(),
                    dropped,
                    capacity = self.capacity,
                    "result buffer full, dropped sample"
                );
                EnqueueOutcome::Dropped(reason)
            }
        }
    }

    /// 설정된 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 현재 큐에 쌓인 샘플 수
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 사용률 (0.0 ~ 1.0)
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// 지금까지 큐에 들어간 샘플 수
    pub fn enqueued_count(&self) -> u64 {
        self.counters.enqueued.load(Ordering::Relaxed)
    }

    /// 지금까지 버려진 샘플 수
    pub fn dropped_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

/// 결과 버퍼 수신측
#[derive(Debug)]
pub struct ResultReceiver {
    rx: mpsc::Receiver<Metric>,
}

impl ResultReceiver {
    /// 다음 샘플을 기다립니다. 모든 송신측이 사라지면 `None`입니다.
    pub async fn recv(&mut self) -> Option<Metric> {
        self.rx.recv().await
    }

    /// 대기 없이 다음 샘플을 꺼냅니다.
    pub fn try_recv(&mut self) -> Option<Metric> {
        match self.rx.try_recv() {
            Ok(metric) => Some(metric),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// 현재 쌓여 있는 샘플을 모두 꺼냅니다.
    pub fn drain(&mut self) -> Vec<Metric> {
        let mut out = Vec::with_capacity(self.rx.len());
        while let Some(metric) = self.try_recv() {
            out.push(metric);
        }
        out
    }

    /// 수신측을 닫습니다. 이후 enqueue는 모두 드롭됩니다.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
