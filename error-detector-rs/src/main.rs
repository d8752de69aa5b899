// error-detector-rs/src/main.rs
// Error Detector - standalone monitoring process

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use error_detector_rs::{init_logging, DetectorConfig, ErrorDetector, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Config file from the first argument, then ERROR_DETECTOR_CONFIG
    let config_path: Option<PathBuf> = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("ERROR_DETECTOR_CONFIG").map(PathBuf::from));

    let logging_config = LoggingConfig::load(config_path.as_deref())?;
    let _log_guard = init_logging(Some(logging_config))?;

    let config = DetectorConfig::load(config_path.as_deref())
        .context("failed to load detector configuration")?;

    if let Some(addr) = config.metrics_addr {
        error_detector_rs::monitoring::install_prometheus_exporter(addr)?;
    }

    let detector = Arc::new(ErrorDetector::new(config).context("failed to build error detector")?);
    detector.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    detector.stop().await;

    Ok(())
}
