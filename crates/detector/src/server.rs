//! 탐지기 서버 -- 리스너와 연결 핸들러의 생명주기를 관리합니다.
//!
//! [`Detector`]는 core의 [`Pipeline`] trait을 구현하여
//! `driftwatch-daemon`에서 start/stop/health_check로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! TcpListener -> accept loop -> ConnectionHandler (연결당 태스크)
//!                                   |
//!                                   v
//!                  LineProcessor -> ResultBuffer -> ResultReceiver (downstream)
//! ```
//!
//! bind 실패는 `start()`의 에러로, 복구 불가능한 accept 실패는
//! [`fatal_signal`](Detector::fatal_signal) 채널로 보고됩니다.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use driftwatch_core::error::{DriftwatchError, PipelineError};
use driftwatch_core::metrics as m;
use driftwatch_core::pipeline::{HealthStatus, Pipeline};

use crate::buffer::{ResultBuffer, ResultReceiver};
use crate::config::DetectorConfig;
use crate::connection::{ConnectionHandler, LineProcessor};
use crate::error::DetectorError;
use crate::rule::{RuleCache, RuleMatcher, RuleRegistry, RuleSource};
use crate::scorer::Scorer;
use crate::stats::{DetectorStats, StatsSnapshot};
use crate::store::{MemoryStateStore, StateStore};

/// 버퍼 사용률이 이 값을 넘으면 Degraded
const DEGRADED_UTILIZATION: f64 = 0.9;

/// 탐지기 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 메트릭 이상 탐지기
///
/// # 사용 예시
/// ```ignore
/// use driftwatch_detector::{DetectorBuilder, DetectorConfig};
///
/// let (mut detector, mut results) = DetectorBuilder::new()
///     .config(config)
///     .rule_source(registry)
///     .build()?;
///
/// detector.start().await?;
/// while let Some(metric) = results.recv().await {
///     // 다운스트림 처리
/// }
/// ```
pub struct Detector {
    config: DetectorConfig,
    state: DetectorState,
    processor: Arc<LineProcessor>,
    matcher: Arc<RuleMatcher>,
    stats: Arc<DetectorStats>,
    buffer: ResultBuffer,
    cancel: CancellationToken,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
    fatal_tx: watch::Sender<Option<String>>,
}

impl Detector {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            DetectorState::Initialized => "initialized",
            DetectorState::Running => "running",
            DetectorState::Stopped => "stopped",
        }
    }

    /// 실제로 바인드된 주소 (실행 중일 때만)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 처리 통계 스냅샷
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 규칙 매처 (캐시 포함)
    pub fn matcher(&self) -> &Arc<RuleMatcher> {
        &self.matcher
    }

    /// 결과 버퍼 송신측
    pub fn buffer(&self) -> &ResultBuffer {
        &self.buffer
    }

    /// 설정
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// 치명적 실패 알림 채널
    ///
    /// 값이 `Some`으로 바뀌면 리스너가 멈춘 것이며 서비스를 종료해야 합니다.
    pub fn fatal_signal(&self) -> watch::Receiver<Option<String>> {
        self.fatal_tx.subscribe()
    }

    /// 라인 처리기 (리스너를 거치지 않고 직접 주입할 때)
    pub fn processor(&self) -> &Arc<LineProcessor> {
        &self.processor
    }
}

impl Pipeline for Detector {
    async fn start(&mut self) -> Result<(), DriftwatchError> {
        if self.state == DetectorState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(addr = %self.config.bind_addr, "starting detector");

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| DetectorError::Bind {
                addr: self.config.bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(DetectorError::Io)?;

        // stop() 이후 재시작을 위해 토큰을 새로 만듦
        self.cancel = CancellationToken::new();
        self.fatal_tx.send_replace(None);

        let listener_task = AcceptLoop {
            listener,
            handler: ConnectionHandler::new(
                Arc::clone(&self.processor),
                self.config.max_line_length,
                self.cancel.child_token(),
            ),
            semaphore: Arc::new(Semaphore::new(self.config.max_connections)),
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.clone(),
            fatal_tx: self.fatal_tx.clone(),
        };
        self.accept_task = Some(tokio::spawn(listener_task.run()));
        self.local_addr = Some(local_addr);
        self.state = DetectorState::Running;

        info!(addr = %local_addr, "detector listening");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DriftwatchError> {
        if self.state != DetectorState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping detector");
        self.cancel.cancel();

        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "accept loop terminated abnormally");
            }
        }

        self.local_addr = None;
        self.state = DetectorState::Stopped;

        let stats = self.stats.snapshot();
        info!(
            lines = stats.lines,
            enqueued = stats.enqueued,
            dropped = stats.dropped,
            "detector stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            DetectorState::Running => {
                let fatal = self.fatal_tx.borrow().clone();
                if let Some(reason) = fatal {
                    return HealthStatus::Unhealthy(reason);
                }
                let utilization = self.buffer.utilization();
                if utilization > DEGRADED_UTILIZATION {
                    HealthStatus::Degraded(format!(
                        "result buffer utilization high: {:.1}%",
                        utilization * 100.0
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            DetectorState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            DetectorState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 리스너 accept 루프
struct AcceptLoop {
    listener: TcpListener,
    handler: ConnectionHandler,
    semaphore: Arc<Semaphore>,
    stats: Arc<DetectorStats>,
    cancel: CancellationToken,
    fatal_tx: watch::Sender<Option<String>>,
}

impl AcceptLoop {
    async fn run(self) {
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!(error = %e, "transient accept error, continuing");
                    }
                    Err(e) => {
                        let err = DetectorError::Accept(e.to_string());
                        error!(error = %err, "listener failed");
                        self.fatal_tx.send_replace(Some(err.to_string()));
                        break;
                    }
                },
                _ = self.cancel.cancelled() => {
                    info!("listener received shutdown signal");
                    break;
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        // 연결 수 제한 확인
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.connection_rejected();
                metrics::counter!(m::DETECTOR_CONNECTIONS_REJECTED_TOTAL).increment(1);
                warn!(%peer, "max connections reached, rejecting connection");
                drop(stream);
                return;
            }
        };

        let conn_id = uuid::Uuid::new_v4();
        let handler = self.handler.clone();
        let stats = Arc::clone(&self.stats);

        stats.connection_opened();
        metrics::gauge!(m::DETECTOR_ACTIVE_CONNECTIONS).increment(1.0);
        info!(%peer, %conn_id, "connection accepted");

        tokio::spawn(async move {
            let peer = peer.to_string();
            let summary = handler.run(stream, &peer).await;

            stats.connection_closed();
            metrics::gauge!(m::DETECTOR_ACTIVE_CONNECTIONS).decrement(1.0);
            debug!(
                %peer,
                %conn_id,
                lines = summary.lines,
                cancelled = summary.cancelled,
                "connection finished"
            );
            drop(permit);
        });
    }
}

/// 연결 하나에만 영향을 주는 accept 에러인지 확인합니다.
fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// 탐지기 빌더
///
/// 협력자를 지정하지 않으면 프로세스 내 구현(빈 [`RuleRegistry`],
/// [`MemoryStateStore`])을 사용합니다.
pub struct DetectorBuilder {
    config: DetectorConfig,
    rule_source: Option<Arc<dyn RuleSource>>,
    state_store: Option<Arc<dyn StateStore>>,
    rule_cache: Option<Arc<RuleCache>>,
}

impl DetectorBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: DetectorConfig::default(),
            rule_source: None,
            state_store: None,
            rule_cache: None,
        }
    }

    /// 탐지기 설정을 지정합니다.
    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    /// 규칙 관리 협력자를 지정합니다.
    pub fn rule_source(mut self, source: Arc<dyn RuleSource>) -> Self {
        self.rule_source = Some(source);
        self
    }

    /// 상태 저장소를 지정합니다.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// 규칙 캐시를 지정합니다.
    pub fn rule_cache(mut self, cache: Arc<RuleCache>) -> Self {
        self.rule_cache = Some(cache);
        self
    }

    /// 탐지기를 빌드합니다.
    ///
    /// # Returns
    /// - `Detector`: 탐지기 인스턴스
    /// - `ResultReceiver`: 점수가 매겨진 샘플 수신측
    pub fn build(self) -> Result<(Detector, ResultReceiver), DetectorError> {
        self.config.validate()?;

        let rule_source = self
            .rule_source
            .unwrap_or_else(|| Arc::new(RuleRegistry::new()));
        let state_store = self
            .state_store
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()));
        let rule_cache = self.rule_cache.unwrap_or_default();

        let matcher = Arc::new(RuleMatcher::with_cache(
            &self.config.blacklist,
            rule_source,
            rule_cache,
        )?);
        let scorer = Scorer::new(self.config.smoothing_factor, self.config.min_count)?;
        let (buffer, receiver) = ResultBuffer::new(self.config.buffer_capacity)?;
        let stats = Arc::new(DetectorStats::new());

        let processor = Arc::new(LineProcessor::new(
            Arc::clone(&matcher),
            scorer,
            state_store,
            buffer.clone(),
            Arc::clone(&stats),
        ));

        let (fatal_tx, _) = watch::channel(None);

        let detector = Detector {
            config: self.config,
            state: DetectorState::Initialized,
            processor,
            matcher,
            stats,
            buffer,
            cancel: CancellationToken::new(),
            local_addr: None,
            accept_task: None,
            fatal_tx,
        };

        Ok((detector, receiver))
    }
}

impl Default for DetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfigBuilder;

    fn local_config() -> DetectorConfig {
        DetectorConfigBuilder::new()
            .bind_addr("127.0.0.1:0")
            .build()
            .unwrap()
    }

    #[test]
    fn builder_creates_detector() {
        let (detector, _rx) = DetectorBuilder::new().build().unwrap();
        assert_eq!(detector.state_name(), "initialized");
        assert!(detector.local_addr().is_none());
        assert!(detector.fatal_signal().borrow().is_none());
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = DetectorConfig {
            buffer_capacity: 0,
            ..DetectorConfig::default()
        };
        assert!(DetectorBuilder::new().config(config).build().is_err());
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let (mut detector, _rx) = DetectorBuilder::new().config(local_config()).build().unwrap();
        assert!(detector.health_check().await.is_unhealthy());

        detector.start().await.unwrap();
        assert_eq!(detector.state_name(), "running");
        assert!(detector.local_addr().is_some());
        assert!(detector.health_check().await.is_healthy());
        assert!(detector.start().await.is_err());

        detector.stop().await.unwrap();
        assert_eq!(detector.state_name(), "stopped");
        assert!(detector.stop().await.is_err());

        // 재시작 가능
        detector.start().await.unwrap();
        detector.stop().await.unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal_error() {
        let (mut first, _rx1) = DetectorBuilder::new().config(local_config()).build().unwrap();
        first.start().await.unwrap();
        let addr = first.local_addr().unwrap();

        let config = DetectorConfigBuilder::new()
            .bind_addr(addr.to_string())
            .build()
            .unwrap();
        let (mut second, _rx2) = DetectorBuilder::new().config(config).build().unwrap();
        let err = second.start().await.unwrap_err();
        assert!(matches!(
            err,
            DriftwatchError::Pipeline(PipelineError::Fatal(_))
        ));

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn full_buffer_degrades_health() {
        let config = DetectorConfigBuilder::new()
            .bind_addr("127.0.0.1:0")
            .buffer_capacity(2)
            .build()
            .unwrap();
        let registry = Arc::new(
            RuleRegistry::with_rules(vec![crate::rule::Rule::new(1, "*")]).unwrap(),
        );
        let (mut detector, _rx) = DetectorBuilder::new()
            .config(config)
            .rule_source(registry)
            .build()
            .unwrap();
        detector.start().await.unwrap();

        detector.processor().process_line(b"a 1 1.0");
        detector.processor().process_line(b"a 2 1.0");
        assert!(matches!(
            detector.health_check().await,
            HealthStatus::Degraded(_)
        ));

        detector.stop().await.unwrap();
    }

    #[test]
    fn transient_accept_errors() {
        assert!(is_transient_accept_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
