//! Broker capabilities the relay components depend on.
//!
//! Components only see [`Publisher`] and [`MessageHandler`]; the composition
//! root binds handlers to queues through a [`Subscriber`]. Deliveries are
//! auto-acknowledged: once a message reaches a handler the broker has already
//! forgotten it, so a failing handler loses the message.

pub mod amqp;
pub mod memory;

use crate::error::RelayError;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::error;

pub use amqp::AmqpBroker;
pub use memory::InMemoryBroker;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `message` to `exchange` under `routing_key`.
    ///
    /// # Errors
    /// Returns an error when the message cannot be encoded or the broker
    /// rejects the publish.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), RelayError>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivered message. May run concurrently with itself.
    ///
    /// # Errors
    /// Errors are logged by the subscription loop and the message is dropped.
    async fn handle(&self, message: Message) -> Result<(), RelayError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Start delivering messages from `queue` to `handler`.
    ///
    /// # Errors
    /// Returns an error if the consumer cannot be registered on the queue.
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, RelayError>;
}

/// A running consume loop. Resolves when the underlying stream ends.
pub struct Subscription {
    queue: String,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Subscription {
    pub(crate) fn new(queue: &str, task: JoinHandle<anyhow::Result<()>>) -> Self {
        Self {
            queue: queue.to_string(),
            task,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the consume loop to stop.
    ///
    /// # Errors
    /// Returns the loop's error, or an error if the task panicked.
    pub async fn wait(self) -> anyhow::Result<()> {
        self.task.await?
    }

    /// Handle for stopping the loop without waiting on it.
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }
}

/// Decode one raw delivery and hand it to `handler` on its own task.
///
/// Malformed bodies and handler failures are logged and the message is lost.
pub(crate) fn dispatch(queue: &str, data: &[u8], handler: &Arc<dyn MessageHandler>) {
    let message = match Message::decode(data) {
        Ok(message) => message,
        Err(e) => {
            error!(
                event = "message_dropped",
                queue = %queue,
                bytes = data.len(),
                preview = %preview(data),
                error = %e,
                "Dropping delivery that does not match the message schema"
            );
            return;
        }
    };

    let handler = Arc::clone(handler);
    let queue = queue.to_string();
    tokio::spawn(async move {
        let id = message.id.clone();
        if let Err(e) = handler.handle(message).await {
            error!(
                event = "message_lost",
                queue = %queue,
                message_id = %id,
                error = %e,
                "Handler failed, message is not redelivered"
            );
        }
    });
}

/// Printable, truncated view of a delivery body for logs.
fn preview(data: &[u8]) -> String {
    const MAX: usize = 200;

    match std::str::from_utf8(data) {
        Ok(s) if s.chars().count() > MAX => {
            let cut: String = s.chars().take(MAX).collect();
            format!("{cut}...")
        }
        Ok(s) => s.to_string(),
        Err(_) => format!("<binary data, {} bytes>", data.len()),
    }
}
