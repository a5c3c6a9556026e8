// Work-queue dispatch: the agent's endpoint of the durable engine
// Run requests arrive as JetStream messages; in-progress acks double as
// heartbeats and a nak hands a cancelled run to another worker.

pub mod consumer;
pub mod nats;

pub use consumer::RunConsumer;
pub use nats::{QueueClient, QueueConfig};
