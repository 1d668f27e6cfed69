//! Rule file loading and periodic reload.
//!
//! The rule file is re-read every `rule_reload_secs`. The registry is only
//! replaced when the parsed rule list differs from the last applied one, so
//! an unchanged file never bumps the version token or flushes the rule cache.
//! A file that fails to load or validate keeps the previous rule set active.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use driftwatch_core::metrics as m;
use driftwatch_detector::{DetectorError, Rule, RuleLoader, RuleRegistry};

/// Applies the rule file at `path` to a [`RuleRegistry`].
pub struct RuleReloader {
    path: PathBuf,
    registry: Arc<RuleRegistry>,
    applied: Option<Vec<Rule>>,
}

impl RuleReloader {
    /// Create a reloader; nothing is read until [`reload`](Self::reload).
    pub fn new(path: impl Into<PathBuf>, registry: Arc<RuleRegistry>) -> Self {
        Self {
            path: path.into(),
            registry,
            applied: None,
        }
    }

    /// Read the rule file and replace the registry content if it changed.
    ///
    /// Returns `Some(version)` when the registry was replaced, `None` when the
    /// file content matches the rules already applied.
    pub async fn reload(&mut self) -> Result<Option<u64>, DetectorError> {
        let rules = RuleLoader::load_file(&self.path).await?;

        if self.applied.as_ref() == Some(&rules) {
            tracing::trace!(path = %self.path.display(), "rule file unchanged");
            return Ok(None);
        }

        let count = rules.len();
        let version = self.registry.replace(rules.clone())?;
        self.applied = Some(rules);

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::DAEMON_RULES_LOADED).set(count as f64);
        tracing::info!(
            path = %self.path.display(),
            rules = count,
            version,
            "monitoring rules applied"
        );
        Ok(Some(version))
    }

    /// Path of the rule file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Spawn a background task that calls [`RuleReloader::reload`] every `interval`.
///
/// Errors are logged and the previous rule set stays active.
pub fn spawn_rule_reloader(
    mut reloader: RuleReloader,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick completes immediately; the file was loaded at startup
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = reloader.reload().await {
                        tracing::warn!(
                            path = %reloader.path().display(),
                            error = %e,
                            "rule reload failed, keeping previous rules"
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("rule reloader shutting down");
                    break;
                }
            }
        }
    })
}
