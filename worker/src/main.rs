// Backup agent binary: load config, discover the hub, consume run requests

use anyhow::Result;
use common::queue::{QueueClient, QueueConfig, RunConsumer};
use common::{bootstrap, telemetry};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Fatal init errors propagate out of main and exit non-zero.
    let settings = bootstrap::load_settings(std::env::args().nth(1).as_deref())?;

    let _log_guard = telemetry::init_logging(&settings.log)?;
    info!("Starting backup agent");

    bootstrap::init_temp_dir(&settings).await?;

    let catalog = bootstrap::init_catalog(&settings)?;
    for job in catalog.iter() {
        info!(job_id = %job.id, provider = %job.provider, "Job configured");
    }

    let tokens = bootstrap::init_token_cache(&settings)?;
    let hub = bootstrap::init_hub(&settings, &tokens).await?;
    info!(workspace = %hub.workspace, queue = %hub.queue, "Connected to workspace");

    let pipeline = bootstrap::init_pipeline(&settings, &hub, tokens, catalog)?;

    let queue = QueueClient::connect(QueueConfig::from_hub(&hub)).await?;
    let shutdown = CancellationToken::new();
    let consumer = Arc::new(RunConsumer::new(&queue, pipeline, shutdown.clone()).await?);

    let consumer_task = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move {
            if let Err(e) = consumer.start().await {
                error!(error = %e, "Consumer error");
            }
        })
    };

    info!("Agent is running");
    wait_for_shutdown().await;

    info!("Shutdown signal received, cancelling in-flight runs");
    shutdown.cancel();
    let _ = consumer_task.await;

    info!("Agent stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received SIGINT");
    }
}
