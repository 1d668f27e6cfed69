//! 통합 테스트 -- TCP 수신부터 결과 버퍼까지의 전체 흐름 검증

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use driftwatch_core::pipeline::Pipeline;
use driftwatch_core::types::Metric;
use driftwatch_detector::{
    Detector, DetectorBuilder, DetectorConfigBuilder, MemoryStateStore, NEUTRAL_SCORE,
    ResultReceiver, Rule, RuleRegistry, StateStore,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    detector: Detector,
    results: ResultReceiver,
    registry: Arc<RuleRegistry>,
    store: Arc<MemoryStateStore>,
}

impl Harness {
    async fn start(configure: impl FnOnce(DetectorConfigBuilder) -> DetectorConfigBuilder) -> Self {
        let config = configure(
            DetectorConfigBuilder::new()
                .bind_addr("127.0.0.1:0")
                .blacklist(vec!["foo.*".to_owned()]),
        )
        .build()
        .expect("valid config");

        let registry = Arc::new(
            RuleRegistry::with_rules(vec![Rule::new(1, "svc.*"), Rule::new(2, "db.*")])
                .expect("valid rules"),
        );
        let store = Arc::new(MemoryStateStore::new());

        let (mut detector, results) = DetectorBuilder::new()
            .config(config)
            .rule_source(registry.clone())
            .state_store(store.clone())
            .build()
            .expect("detector builds");
        detector.start().await.expect("detector starts");

        Self {
            detector,
            results,
            registry,
            store,
        }
    }

    async fn connect(&self) -> TcpStream {
        let addr = self.detector.local_addr().expect("listening");
        TcpStream::connect(addr).await.expect("connect")
    }

    async fn next_result(&mut self) -> Metric {
        timeout(RECV_TIMEOUT, self.results.recv())
            .await
            .expect("result within timeout")
            .expect("buffer open")
    }

    async fn wait_for_lines(&self, lines: u64) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while self.detector.stats().lines < lines {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {lines} lines"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// 블랙리스트 이름은 점수가 매겨지지 않고, 감시 대상은 Cold에서 Warm으로 전환됨
#[tokio::test]
async fn test_blacklist_and_cold_to_warm_transition() {
    let mut h = Harness::start(|b| b.min_count(30).smoothing_factor(0.05)).await;
    let mut client = h.connect().await;

    client
        .write_all(b"foo.bar 100 1700000000\n")
        .await
        .unwrap();

    let mut previous_count = 0;
    for i in 0..50u32 {
        let value = 100.0 + f64::from(i) * 0.5;
        let line = format!("svc.latency {} {value}\n", 1_700_000_000 + u64::from(i));
        client.write_all(line.as_bytes()).await.unwrap();

        let result = h.next_result().await;
        assert_eq!(result.name, "svc.latency", "blacklisted sample leaked");
        assert_eq!(result.value, value);

        if i < 30 {
            assert_eq!(result.score, NEUTRAL_SCORE, "sample {i} scored while cold");
        } else {
            assert!(result.score.is_finite());
            assert!(result.score > 0.0, "sample {i} has trivial score");
        }

        let count = h
            .store
            .get("svc.latency")
            .unwrap()
            .expect("state persisted")
            .count;
        assert!(count > previous_count);
        previous_count = count;
    }

    assert_eq!(previous_count, 50);
    assert_eq!(h.store.get("foo.bar").unwrap(), None);
    assert!(h.results.try_recv().is_none());

    let stats = h.detector.stats();
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.enqueued, 50);

    h.detector.stop().await.unwrap();
}

/// 잘못된 라인은 버려지고 연결은 유지됨
#[tokio::test]
async fn test_parse_error_keeps_connection_open() {
    let mut h = Harness::start(|b| b).await;
    let mut client = h.connect().await;

    client
        .write_all(b"garbage\nsvc.a notanumber 1\n\nsvc.a 1 1.5\n")
        .await
        .unwrap();

    let result = h.next_result().await;
    assert_eq!(result.name, "svc.a");
    assert_eq!(result.value, 1.5);

    h.wait_for_lines(4).await;
    let stats = h.detector.stats();
    assert_eq!(stats.parse_errors, 2);
    assert_eq!(stats.blank, 1);

    h.detector.stop().await.unwrap();
}

/// 버퍼 용량을 넘는 결과는 대기 없이 버려지고 모두 집계됨
#[tokio::test]
async fn test_buffer_overflow_drops_and_counts() {
    let mut h = Harness::start(|b| b.buffer_capacity(4)).await;
    let mut client = h.connect().await;

    let mut payload = String::new();
    for i in 0..10 {
        payload.push_str(&format!("svc.q {i} {i}.0\n"));
    }
    client.write_all(payload.as_bytes()).await.unwrap();

    h.wait_for_lines(10).await;
    let stats = h.detector.stats();
    assert_eq!(stats.enqueued, 4);
    assert_eq!(stats.dropped, 6);
    assert_eq!(h.detector.buffer().dropped_count(), 6);

    let drained = h.results.drain();
    let stamps: Vec<u64> = drained.iter().map(|m| m.stamp).collect();
    assert_eq!(stamps, vec![0, 1, 2, 3]);

    // 드롭된 샘플도 베이스라인에는 반영됨
    assert_eq!(h.store.get("svc.q").unwrap().map(|s| s.count), Some(10));

    h.detector.stop().await.unwrap();
}

/// 규칙 집합 교체 후 캐시된 판정이 쓰이지 않음
#[tokio::test]
async fn test_rule_replacement_invalidates_cache() {
    let mut h = Harness::start(|b| b).await;
    let mut client = h.connect().await;

    client.write_all(b"svc.a 1 1.0\n").await.unwrap();
    assert_eq!(h.next_result().await.name, "svc.a");
    assert!(h.detector.matcher().cache().lookup("svc.a").is_some());

    h.registry
        .replace(vec![Rule::new(10, "web.*")])
        .expect("valid rules");

    client
        .write_all(b"svc.a 2 1.0\nweb.b 3 1.0\n")
        .await
        .unwrap();

    let result = h.next_result().await;
    assert_eq!(result.name, "web.b");
    h.wait_for_lines(3).await;
    assert_eq!(h.detector.stats().ignored, 1);

    h.detector.stop().await.unwrap();
}

/// 한 연결의 종료가 다른 연결에 영향을 주지 않음
#[tokio::test]
async fn test_connections_are_isolated() {
    let mut h = Harness::start(|b| b).await;
    let mut first = h.connect().await;
    let mut second = h.connect().await;

    first.write_all(b"svc.one 1 1.0\n").await.unwrap();
    assert_eq!(h.next_result().await.name, "svc.one");
    drop(first);

    second.write_all(b"svc.two 1 1.0\n").await.unwrap();
    assert_eq!(h.next_result().await.name, "svc.two");

    h.detector.stop().await.unwrap();
}

/// 최대 연결 수를 넘는 연결은 즉시 닫힘
#[tokio::test]
async fn test_connection_limit_rejects_excess() {
    let mut h = Harness::start(|b| b.max_connections(1)).await;

    let mut first = h.connect().await;
    first.write_all(b"svc.a 1 1.0\n").await.unwrap();
    assert_eq!(h.next_result().await.name, "svc.a");

    let mut second = h.connect().await;
    let mut buf = [0u8; 8];
    let read = timeout(RECV_TIMEOUT, second.read(&mut buf))
        .await
        .expect("rejected connection closes");
    // 서버가 닫았으므로 EOF 또는 reset
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(h.detector.stats().connections_rejected, 1);

    h.detector.stop().await.unwrap();
}

/// stop 이후에는 새 연결을 받지 않음
#[tokio::test]
async fn test_stop_closes_listener() {
    let mut h = Harness::start(|b| b).await;
    let addr = h.detector.local_addr().unwrap();
    h.detector.stop().await.unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}
