//! Daemon orchestrator -- owns the detector and its background tasks.
//!
//! # Lifecycle
//!
//! ```text
//! build_from_config -> start -> wait(shutdown) -> shutdown
//! ```
//!
//! [`Orchestrator::run`] chains the three steps and waits on SIGTERM/SIGINT.
//! A fatal listener error reported by the detector ends [`Orchestrator::wait`]
//! with an error, so the process exits non-zero.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use driftwatch_core::config::DriftwatchConfig;
use driftwatch_core::metrics as m;
use driftwatch_core::pipeline::Pipeline;
use driftwatch_detector::{
    Detector, DetectorBuilder, DetectorConfig, MemoryStateStore, ResultReceiver, RuleRegistry,
};

use crate::consumer::{ConsumerSummary, spawn_result_consumer};
use crate::health::{DaemonHealth, log_health};
use crate::metrics_server;
use crate::reload::{RuleReloader, spawn_rule_reloader};

/// Interval between health reports in the main loop.
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between uptime gauge updates.
const UPTIME_INTERVAL: Duration = Duration::from_secs(10);

/// Central coordinator for the driftwatch daemon.
pub struct Orchestrator {
    config: DriftwatchConfig,
    detector: Detector,
    registry: Arc<RuleRegistry>,
    store: Arc<MemoryStateStore>,
    /// Taken by `start()` when periodic reload is enabled.
    reloader: Option<RuleReloader>,
    /// Taken by `start()` and handed to the consumer task.
    results: Option<ResultReceiver>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    consumer_task: Option<JoinHandle<ConsumerSummary>>,
    start_time: Instant,
}

impl Orchestrator {
    /// Build the orchestrator from an already-loaded configuration.
    ///
    /// Installs the Prometheus recorder when `[metrics] enabled = true` and
    /// loads `rules_path` once; a rule file that cannot be loaded at startup
    /// is an error.
    pub async fn build_from_config(config: DriftwatchConfig) -> Result<Self> {
        config.validate()?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let registry = Arc::new(RuleRegistry::new());
        let reloader = if config.detector.rules_path.is_empty() {
            tracing::warn!("no rules_path configured, every sample will be ignored");
            None
        } else {
            let mut reloader =
                RuleReloader::new(&config.detector.rules_path, Arc::clone(&registry));
            reloader.reload().await.map_err(|e| {
                anyhow::anyhow!(
                    "failed to load rules from '{}': {}",
                    config.detector.rules_path,
                    e
                )
            })?;
            Some(reloader)
        };

        let store = Arc::new(MemoryStateStore::new());
        let (detector, results) = DetectorBuilder::new()
            .config(DetectorConfig::from_core(&config.detector))
            .rule_source(registry.clone())
            .state_store(store.clone())
            .build()?;

        let (shutdown_tx, _) = broadcast::channel(16);

        tracing::info!(
            bind = %detector.config().bind_addr,
            rules = registry.rule_count(),
            blacklist = detector.matcher().blacklist_len(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            detector,
            registry,
            store,
            reloader,
            results: Some(results),
            shutdown_tx,
            tasks: Vec::new(),
            consumer_task: None,
            start_time: Instant::now(),
        })
    }

    /// Start the detector and spawn the background tasks.
    pub async fn start(&mut self) -> Result<()> {
        self.detector.start().await?;

        if let Some(results) = self.results.take() {
            self.consumer_task = Some(spawn_result_consumer(
                results,
                self.shutdown_tx.subscribe(),
            ));
        }

        let reload_secs = self.config.detector.rule_reload_secs;
        if let Some(reloader) = self.reloader.take().filter(|_| reload_secs > 0) {
            self.tasks.push(spawn_rule_reloader(
                reloader,
                Duration::from_secs(reload_secs),
                self.shutdown_tx.subscribe(),
            ));
        }

        if self.config.metrics.enabled {
            self.tasks.push(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ));
        }

        tracing::info!(addr = ?self.detector.local_addr(), "driftwatch running");
        Ok(())
    }

    /// Run the main loop until `shutdown` resolves or the detector fails.
    ///
    /// Logs a health report every 30 seconds. Returns the detector's fatal
    /// error, if any.
    pub async fn wait<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let mut fatal = self.detector.fatal_signal();
        if let Some(reason) = fatal.borrow_and_update().clone() {
            return Err(anyhow::anyhow!("detector failed: {}", reason));
        }

        let mut health_tick = tokio::time::interval(HEALTH_INTERVAL);
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        health_tick.tick().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    let signal = signal?;
                    tracing::info!(signal, "shutdown signal received");
                    return Ok(());
                }
                changed = fatal.changed() => {
                    if changed.is_err() {
                        return Err(anyhow::anyhow!("detector fatal channel closed"));
                    }
                    if let Some(reason) = fatal.borrow_and_update().clone() {
                        tracing::error!(reason = %reason, "detector reported a fatal error");
                        return Err(anyhow::anyhow!("detector failed: {}", reason));
                    }
                }
                _ = health_tick.tick() => {
                    let health = self.health().await;
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DETECTOR_BUFFER_LENGTH).set(health.buffer_len as f64);
                    log_health(&health);
                }
            }
        }
    }

    /// Stop the detector, then the background tasks.
    ///
    /// The detector goes first so the consumer can drain every result that
    /// was produced before the listener closed.
    pub async fn shutdown(&mut self) -> Result<Option<ConsumerSummary>> {
        let stopped = self.detector.stop().await;

        tracing::info!("broadcasting shutdown signal to background tasks");
        let _ = self.shutdown_tx.send(());

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task terminated abnormally");
            }
        }

        let summary = match self.consumer_task.take() {
            Some(task) => match task.await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    tracing::warn!(error = %e, "result consumer terminated abnormally");
                    None
                }
            },
            None => None,
        };

        stopped?;
        tracing::info!("driftwatch shut down");
        Ok(summary)
    }

    /// Start, wait for SIGTERM/SIGINT or a fatal detector error, then shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        let outcome = self.wait(wait_for_shutdown_signal()).await;
        let stopped = self.shutdown().await;
        outcome.and(stopped.map(|_| ()))
    }

    /// Current health snapshot.
    pub async fn health(&self) -> DaemonHealth {
        DaemonHealth {
            status: self.detector.health_check().await,
            uptime_secs: self.start_time.elapsed().as_secs(),
            rules_loaded: self.registry.rule_count(),
            buffer_len: self.detector.buffer().len(),
            detector: self.detector.stats(),
        }
    }

    /// Address the detector is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.detector.local_addr()
    }

    /// The rule registry fed by the rule file.
    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// The baseline state store.
    pub fn store(&self) -> &Arc<MemoryStateStore> {
        &self.store
    }

    /// The loaded configuration.
    pub fn config(&self) -> &DriftwatchConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to install Ctrl-C handler: {}", e))?;
    Ok("CTRL_C")
}

/// Spawn a background task that periodically updates the uptime gauge.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
