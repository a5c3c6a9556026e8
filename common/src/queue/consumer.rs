// Run consumer: drains the work queue and feeds the pipeline

use crate::errors::{Classify, ErrorClass, QueueError};
use crate::models::RunRequest;
use crate::pipeline::BackupPipeline;
use crate::queue::QueueClient;
use crate::runtime::{Heartbeat, StepContext};
use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::{AckKind, Message};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Consumes run requests until shutdown; one run at a time per pool slot,
/// the engine sizes the pool by running more slots.
pub struct RunConsumer {
    consumer: PullConsumer,
    pipeline: Arc<BackupPipeline>,
    shutdown: CancellationToken,
}

impl RunConsumer {
    pub async fn new(
        client: &QueueClient,
        pipeline: Arc<BackupPipeline>,
        shutdown: CancellationToken,
    ) -> Result<Self, QueueError> {
        let consumer = client.run_consumer().await?;
        Ok(Self {
            consumer,
            pipeline,
            shutdown,
        })
    }

    /// Process messages until the shutdown token fires.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), QueueError> {
        let mut messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| QueueError::Consume(format!("failed to open message stream: {}", e)))?;

        info!("Consumer started, waiting for run requests");

        loop {
            tokio::select! {
                message = messages.next() => {
                    match message {
                        Some(Ok(message)) => self.process(message).await,
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving message");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                        None => {
                            warn!("Message stream ended unexpectedly");
                            break;
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping consumer");
                    break;
                }
            }
        }

        info!("Consumer stopped");
        Ok(())
    }

    /// Run one request and settle its message.
    ///
    /// Outcomes (success or a failure already reported through confirm) ack
    /// the message; only cancellation naks it so another worker picks the
    /// run back up.
    async fn process(&self, message: Message) {
        let message = Arc::new(message);

        let request: RunRequest = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "Undecodable run request, dropping");
                ack(&message, AckKind::Term).await;
                return;
            }
        };

        info!(job_id = %request.job_id, run_id = %request.run_id, "Run request received");

        // Heartbeats from the pipeline become in-progress acks, which hold
        // off the queue's redelivery timer during long steps.
        let (beat_tx, mut beat_rx) = mpsc::channel::<()>(1);
        let heartbeat_message = Arc::clone(&message);
        let heartbeat_task = tokio::spawn(async move {
            while beat_rx.recv().await.is_some() {
                if let Err(e) = heartbeat_message.ack_with(AckKind::Progress).await {
                    warn!(error = %e, "Failed to send progress ack");
                }
            }
        });

        let step = StepContext::new(self.shutdown.child_token(), Heartbeat::new(beat_tx));
        let result = self.pipeline.run(&request, &step).await;
        drop(step);
        let _ = heartbeat_task.await;

        match result {
            Ok(()) => ack(&message, AckKind::Ack).await,
            Err(err) if err.class() == ErrorClass::Cancelled => {
                warn!(job_id = %request.job_id, "Run cancelled, returning to queue");
                ack(&message, AckKind::Nak(None)).await;
            }
            Err(err) => {
                error!(job_id = %request.job_id, error = %err, "Run failed");
                ack(&message, AckKind::Ack).await;
            }
        }
    }
}

async fn ack(message: &Message, kind: AckKind) {
    if let Err(e) = message.ack_with(kind).await {
        warn!(error = %e, "Failed to settle message");
    }
}
