// NATS JetStream client for the hub-advertised work queue

use crate::errors::QueueError;
use crate::hub::HubConfig;
use async_nats::jetstream::{
    consumer::{pull::Config as PullConfig, PullConsumer},
    stream::Config as StreamConfig,
    Context as JetStreamContext,
};
use std::time::Duration;
use tracing::{info, instrument};

/// Redelivery kicks in when a run goes this long without a heartbeat.
const ACK_WAIT: Duration = Duration::from_secs(60);

/// Queue coordinates, taken from the hub response.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue server address.
    pub server: String,
    /// Stream and subject name for run requests.
    pub queue: String,
    pub tls: bool,
}

impl QueueConfig {
    pub fn from_hub(hub: &HubConfig) -> Self {
        Self {
            server: hub.server.clone(),
            queue: hub.queue.clone(),
            tls: hub.tls.enabled,
        }
    }
}

/// Connected JetStream client bound to one work queue.
pub struct QueueClient {
    jetstream: JetStreamContext,
    config: QueueConfig,
}

impl QueueClient {
    /// Dial the queue server and bind the JetStream context.
    #[instrument(skip(config), fields(server = %config.server, queue = %config.queue))]
    pub async fn connect(config: QueueConfig) -> Result<Self, QueueError> {
        info!("Connecting to work queue");

        let options = async_nats::ConnectOptions::new().require_tls(config.tls);
        let client = options
            .connect(&config.server)
            .await
            .map_err(|e| QueueError::Connect(format!("failed to connect to queue: {}", e)))?;

        info!("Connected to work queue");
        let jetstream = async_nats::jetstream::new(client);

        Ok(Self { jetstream, config })
    }

    /// Get or create the durable pull consumer this agent drains.
    #[instrument(skip(self))]
    pub async fn run_consumer(&self) -> Result<PullConsumer, QueueError> {
        let stream_config = StreamConfig {
            name: self.config.queue.clone(),
            subjects: vec![self.config.queue.clone()],
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::Stream(format!("failed to open stream: {}", e)))?;

        let consumer_name = format!("{}-workers", self.config.queue);
        let consumer = stream
            .get_or_create_consumer(
                &consumer_name,
                PullConfig {
                    durable_name: Some(consumer_name.clone()),
                    ack_wait: ACK_WAIT,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::Consumer(format!("failed to open consumer: {}", e)))?;

        info!(consumer = %consumer_name, "Run consumer ready");
        Ok(consumer)
    }
}
