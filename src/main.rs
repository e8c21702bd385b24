mod bluetooth;
mod config;
mod database;
mod error;
mod models;
mod sensortag;
mod telemetry;
#[cfg(test)]
mod testing;
mod utils;

use futures_util::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

use bluetooth::BluerConnector;
use config::{SensorTagConfig, SinkConfig};
use database::PostgresSink;
use sensortag::{supervise, Session, StopFlag};
use telemetry::{FanoutSink, JsonLinesSink, TelemetrySink};

const SHUTDOWN_GRACE_SECS: u64 = 10;

async fn build_sink(
    config: &SinkConfig,
) -> Result<Arc<dyn TelemetrySink>, Box<dyn std::error::Error>> {
    let mut sinks: Vec<Arc<dyn TelemetrySink>> = Vec::new();

    match &config.log_path {
        Some(path) => {
            info!("Appending telemetry to {}", path);
            sinks.push(Arc::new(JsonLinesSink::append_to(path).await?));
        }
        None => sinks.push(Arc::new(JsonLinesSink::stdout())),
    }

    if let Some(database_url) = &config.database_url {
        info!("Storing telemetry in PostgreSQL");
        sinks.push(Arc::new(PostgresSink::new(
            database_url,
            config.database_max_retries,
        )));
    }

    if sinks.len() == 1 {
        return Ok(sinks.remove(0));
    }
    Ok(Arc::new(FanoutSink::new(sinks)))
}

async fn run(config: SensorTagConfig, stop: StopFlag) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting SensorTag telemetry service");

    let sink = build_sink(&config.sinks).await?;
    let connector = BluerConnector::new().await?;

    let mut tasks = Vec::new();
    for device in config.devices {
        let mut session = Session::new(
            connector.clone(),
            &device.address,
            &device.name,
            config.session,
            sink.clone(),
            stop.clone(),
        );
        let policy = config.reconnect;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = supervise(&mut session, &policy).await {
                error!("Giving up on {} ({}): {}", device.name, device.address, e);
            }
        }));
    }

    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!("Session task failed: {}", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match SensorTagConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        let _ = tx.send(());
    });

    let stop = StopFlag::new();
    let service = run(config, stop.clone());
    tokio::pin!(service);

    // Run sessions or wait for shutdown signal
    tokio::select! {
        result = &mut service => {
            match result {
                Ok(_) => info!("All sessions finished"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Stopping sessions.");
            stop.request_stop();
            // Sessions notice the flag within one notification timeout
            if timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), &mut service).await.is_err() {
                warn!(
                    "Sessions did not stop within {} seconds, exiting anyway",
                    SHUTDOWN_GRACE_SECS
                );
            }
        }
    }

    Ok(())
}
