use crate::broker::Publisher;
use crate::error::RelayError;
use crate::message::Message;
use std::sync::Arc;
use tracing::{debug, info};

/// Producer side entry point: wraps raw content and publishes it for enrichment.
pub struct Ingress {
    publisher: Arc<dyn Publisher>,
    exchange: String,
    routing_key: String,
}

impl Ingress {
    pub fn new(publisher: Arc<dyn Publisher>, exchange: &str, routing_key: &str) -> Self {
        Self {
            publisher,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        }
    }

    /// Build a new message around `content`, publish it once and return it.
    ///
    /// # Errors
    /// Returns the broker error if the publish fails. Nothing is retried.
    pub async fn handle_request(&self, content: String) -> Result<Message, RelayError> {
        let message = Message::new(content);

        debug!(
            event = "message_sending",
            message_id = %message.id,
            exchange = %self.exchange,
            routing_key = %self.routing_key,
            "Sending message to input queue"
        );
        self.publisher
            .publish(&self.exchange, &self.routing_key, &message)
            .await?;
        info!(
            event = "message_published",
            message_id = %message.id,
            routing_key = %self.routing_key,
            "Message published"
        );

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingPublisher, RecordingPublisher};
    use chrono::Utc;
    use std::collections::HashSet;
    use std::io;
    use std::sync::Mutex;

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (buffer, tracing::subscriber::set_default(subscriber))
    }

    fn ingress(publisher: Arc<dyn Publisher>) -> Ingress {
        Ingress::new(publisher, "messages.exchange", "input")
    }

    #[tokio::test]
    async fn handle_request_publishes_fresh_message_under_input_key() {
        let publisher = Arc::new(RecordingPublisher::new());
        let ingress = ingress(publisher.clone());

        let before = Utc::now();
        let message = ingress.handle_request("hello".to_string()).await.unwrap();
        let after = Utc::now();

        assert_eq!(message.content, "hello");
        assert_eq!(message.enriched_by, None);
        assert!(!message.id.is_empty());
        assert!(before <= message.timestamp && message.timestamp <= after);

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "messages.exchange");
        assert_eq!(published[0].routing_key, "input");
        assert_eq!(published[0].message, message);
    }

    #[tokio::test]
    async fn empty_content_is_accepted() {
        let publisher = Arc::new(RecordingPublisher::new());
        let message = ingress(publisher.clone())
            .handle_request(String::new())
            .await
            .unwrap();

        assert_eq!(message.content, "");
        assert_eq!(publisher.published()[0].message.content, "");
    }

    #[tokio::test]
    async fn repeated_content_gets_distinct_ids() {
        let publisher = Arc::new(RecordingPublisher::new());
        let ingress = ingress(publisher.clone());

        let mut ids = HashSet::new();
        for _ in 0..50 {
            let message = ingress.handle_request("same".to_string()).await.unwrap();
            ids.insert(message.id);
        }

        assert_eq!(ids.len(), 50);
        assert_eq!(publisher.published().len(), 50);
    }

    #[tokio::test]
    async fn publish_failure_is_returned_to_caller() {
        let err = ingress(Arc::new(FailingPublisher))
            .handle_request("hello".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::ChannelClosed(_)));
    }

    #[tokio::test]
    async fn published_event_is_logged_only_after_broker_accepts() {
        let (logs, _guard) = capture_logs();
        ingress(Arc::new(FailingPublisher))
            .handle_request("hello".to_string())
            .await
            .unwrap_err();

        let failed = logs.contents();
        assert!(failed.contains("message_sending"), "{failed}");
        assert!(!failed.contains("message_published"), "{failed}");

        let (logs, _guard) = capture_logs();
        ingress(Arc::new(RecordingPublisher::new()))
            .handle_request("hello".to_string())
            .await
            .unwrap();

        let sent = logs.contents();
        let sending = sent.find("message_sending").unwrap();
        let published = sent.find("message_published").unwrap();
        assert!(sending < published, "{sent}");
    }
}
