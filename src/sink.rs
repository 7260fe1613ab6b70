use crate::broker::MessageHandler;
use crate::error::RelayError;
use crate::message::Message;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// End of the pipeline: logs every enriched message from the output queue.
#[derive(Default)]
pub struct Sink {
    tap: Option<UnboundedSender<Message>>,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward each observed message to `tap`.
    pub fn with_tap(tap: UnboundedSender<Message>) -> Self {
        Self { tap: Some(tap) }
    }
}

#[async_trait]
impl MessageHandler for Sink {
    async fn handle(&self, message: Message) -> Result<(), RelayError> {
        info!(
            event = "message_observed",
            message_id = %message.id,
            content = %message.content,
            timestamp = %message.timestamp,
            enriched_by = ?message.enriched_by,
            "Received enriched message from output queue"
        );

        if let Some(tap) = &self.tap {
            // A dropped receiver only means nobody is watching anymore.
            let _ = tap.send(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn handle_forwards_message_unchanged_to_tap() {
        let (tx, mut rx) = unbounded_channel();
        let sink = Sink::with_tap(tx);
        let message = Message::new("done").enriched("consumer");

        sink.handle(message.clone()).await.unwrap();

        assert_eq!(rx.recv().await, Some(message));
    }

    #[tokio::test]
    async fn handle_succeeds_without_tap_or_receiver() {
        Sink::new().handle(Message::new("x")).await.unwrap();

        let (tx, rx) = unbounded_channel();
        drop(rx);
        Sink::with_tap(tx).handle(Message::new("y")).await.unwrap();
    }
}
