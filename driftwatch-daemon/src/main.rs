use anyhow::{Context, Result};
use clap::Parser;

use driftwatch_core::config::DriftwatchConfig;
use driftwatch_daemon::cli::DaemonCli;
use driftwatch_daemon::logging;
use driftwatch_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // defaults -> file -> env -> CLI flags
    let mut config = DriftwatchConfig::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config '{}'", cli.config.display()))?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid command-line override")?;

    if cli.validate {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init_tracing(&config.general)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "driftwatch starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    if let Err(e) = orchestrator.run().await {
        tracing::error!(error = %e, "driftwatch terminated with error");
        return Err(e);
    }

    Ok(())
}
