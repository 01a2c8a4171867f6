use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod alert;
mod config;
mod engine;
mod models;
mod report;
mod sip;
mod state;

use crate::alert::{AlertSink, TelegramSink, WebhookSink};
use crate::config::MonitorConfig;
use crate::engine::Monitor;
use crate::report::Reporter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .with_ansi(true)
        .init();

    let config_path = "config.json";
    let config_content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path))?;
    let config: MonitorConfig = serde_json::from_str(&config_content)
        .with_context(|| "Failed to parse config")?;
    if config.targets.is_empty() {
        bail!("No targets configured; nothing to monitor");
    }

    let shutdown = CancellationToken::new();
    let monitor = Arc::new(Monitor::new(config.clone(), shutdown.clone()).await?);

    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    if let Some(telegram) = config.alerts.telegram.as_ref().and_then(TelegramSink::from_config) {
        sinks.push(Arc::new(telegram));
    }
    if let Some(url) = &config.alerts.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone())));
    }
    if sinks.is_empty() {
        warn!("No alert sinks configured; outage reports will only be logged");
    }
    let reporter = Reporter::new(config.report_interval_secs, sinks, Utc::now());

    let loop_handle = tokio::spawn(Arc::clone(&monitor).run(reporter));

    signal::ctrl_c().await?;
    info!("Shutdown signal received. Finishing in-flight cycle...");
    shutdown.cancel();
    loop_handle.await?;

    Ok(())
}
