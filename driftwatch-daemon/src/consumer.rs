//! Result consumer -- drains scored samples from the detector's result buffer.
//!
//! Samples outside the 3-sigma band (`|score| >= 1`) are reported at warn
//! and counted; everything else is logged at trace.

use tokio::sync::broadcast;

use driftwatch_core::metrics as m;
use driftwatch_core::types::Metric;
use driftwatch_detector::ResultReceiver;

/// Totals observed by the consumer over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerSummary {
    /// Scored samples received.
    pub received: u64,
    /// Samples reported as anomalies.
    pub anomalies: u64,
}

impl ConsumerSummary {
    fn observe(&mut self, metric: &Metric) {
        self.received += 1;
        if report(metric) {
            self.anomalies += 1;
        }
    }
}

/// Log a single scored sample. Returns `true` if it was an anomaly.
pub fn report(metric: &Metric) -> bool {
    if metric.is_anomalous() {
        metrics::counter!(m::DAEMON_ANOMALIES_TOTAL).increment(1);
        tracing::warn!(
            name = %metric.name,
            stamp = metric.stamp,
            value = metric.value,
            average = metric.average,
            score = metric.score,
            "anomaly detected"
        );
        true
    } else {
        tracing::trace!(
            name = %metric.name,
            value = metric.value,
            score = metric.score,
            "sample within baseline"
        );
        false
    }
}

/// Spawn the consumer task.
///
/// On shutdown, whatever is still buffered is drained and reported before the
/// task returns its [`ConsumerSummary`].
pub fn spawn_result_consumer(
    mut results: ResultReceiver,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<ConsumerSummary> {
    tokio::spawn(async move {
        let mut summary = ConsumerSummary::default();

        loop {
            tokio::select! {
                received = results.recv() => match received {
                    Some(metric) => summary.observe(&metric),
                    None => {
                        tracing::debug!("result buffer closed, exiting consumer");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    results.close();
                    for metric in results.drain() {
                        summary.observe(&metric);
                    }
                    tracing::debug!("result consumer shutting down");
                    break;
                }
            }
        }

        tracing::info!(
            received = summary.received,
            anomalies = summary.anomalies,
            "result consumer finished"
        );
        summary
    })
}
