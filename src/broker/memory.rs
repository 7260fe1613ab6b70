use super::{MessageHandler, Publisher, Subscriber, Subscription, dispatch};
use crate::conf::Topology;
use crate::error::RelayError;
use crate::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info, warn};

struct Queue {
    sender: UnboundedSender<Vec<u8>>,
    receiver: Option<UnboundedReceiver<Vec<u8>>>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    // (exchange, routing key) -> bound queues
    bindings: HashMap<(String, String), Vec<String>>,
}

/// In-process direct exchange.
///
/// Messages travel as encoded JSON bodies, queues are unbounded, and each
/// queue accepts a single consumer. Unroutable messages are dropped silently,
/// as a broker does for a publish without the mandatory flag.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker with the relay's exchange, queues and bindings in place.
    pub fn with_topology(topology: &Topology) -> Self {
        let broker = Self::new();
        for (queue, routing_key) in topology.bindings() {
            broker.bind(queue, &topology.exchange, routing_key);
        }
        broker
    }

    /// Declare `queue` if needed and bind it to `exchange` under `routing_key`.
    pub fn bind(&self, queue: &str, exchange: &str, routing_key: &str) {
        let mut state = self.lock();

        state.queues.entry(queue.to_string()).or_insert_with(|| {
            let (sender, receiver) = unbounded_channel();
            Queue {
                sender,
                receiver: Some(receiver),
            }
        });

        let bound = state
            .bindings
            .entry((exchange.to_string(), routing_key.to_string()))
            .or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }

        info!(
            event = "queue_bound",
            exchange = %exchange,
            queue = %queue,
            routing_key = %routing_key,
            "Queue declared and bound"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Nothing panics while holding the lock, so poisoning carries no broken invariant.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), RelayError> {
        let payload = message.encode()?;
        let state = self.lock();

        let Some(queues) = state
            .bindings
            .get(&(exchange.to_string(), routing_key.to_string()))
        else {
            warn!(
                event = "message_unroutable",
                exchange = %exchange,
                routing_key = %routing_key,
                message_id = %message.id,
                "No queue bound for routing key, message dropped"
            );
            return Ok(());
        };

        for name in queues {
            let queue = state
                .queues
                .get(name)
                .ok_or_else(|| RelayError::QueueUnavailable(name.clone()))?;
            queue
                .sender
                .send(payload.clone())
                .map_err(|_| RelayError::ChannelClosed(name.clone()))?;
        }

        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            message_id = %message.id,
            "Published message"
        );
        Ok(())
    }
}

#[async_trait]
impl Subscriber for InMemoryBroker {
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, RelayError> {
        let mut receiver = {
            let mut state = self.lock();
            let entry = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| RelayError::QueueUnavailable(format!("no queue named '{queue}'")))?;
            entry.receiver.take().ok_or_else(|| {
                RelayError::QueueUnavailable(format!("queue '{queue}' already has a consumer"))
            })?
        };

        info!(event = "consumer_started", queue = %queue, "Consuming from queue");

        let queue_name = queue.to_string();
        let task = tokio::spawn(async move {
            while let Some(data) = receiver.recv().await {
                dispatch(&queue_name, &data, &handler);
            }
            Err(anyhow::anyhow!("Queue '{queue_name}' was closed"))
        });

        Ok(Subscription::new(queue, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ChannelHandler;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn routes_by_routing_key_to_bound_queue() {
        let broker = InMemoryBroker::with_topology(&Topology::default());
        let (input_handler, mut input_rx) = ChannelHandler::new();
        let (output_handler, mut output_rx) = ChannelHandler::new();
        broker
            .subscribe("input.queue", Arc::new(input_handler))
            .await
            .unwrap();
        broker
            .subscribe("output.queue", Arc::new(output_handler))
            .await
            .unwrap();

        let message = Message::new("routed");
        broker
            .publish("messages.exchange", "output", &message)
            .await
            .unwrap();

        let got = timeout(Duration::from_secs(1), output_rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(message));
        assert!(input_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn messages_wait_in_queue_until_subscribed() {
        let broker = InMemoryBroker::with_topology(&Topology::default());
        let message = Message::new("early");
        broker
            .publish("messages.exchange", "input", &message)
            .await
            .unwrap();

        let (handler, mut rx) = ChannelHandler::new();
        broker
            .subscribe("input.queue", Arc::new(handler))
            .await
            .unwrap();

        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got, Some(message));
    }

    #[tokio::test]
    async fn unroutable_publish_is_dropped_without_error() {
        let broker = InMemoryBroker::with_topology(&Topology::default());

        broker
            .publish("messages.exchange", "nowhere", &Message::new("lost"))
            .await
            .unwrap();
        broker
            .publish("other.exchange", "input", &Message::new("lost"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscribe_rejects_unknown_and_taken_queues() {
        let broker = InMemoryBroker::with_topology(&Topology::default());
        let (handler, _rx) = ChannelHandler::new();
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);

        let err = broker
            .subscribe("missing.queue", Arc::clone(&handler))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::QueueUnavailable(_)));

        let first = broker
            .subscribe("input.queue", Arc::clone(&handler))
            .await
            .unwrap();
        assert_eq!(first.queue(), "input.queue");

        let err = broker
            .subscribe("input.queue", handler)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("already has a consumer"));
    }

    #[tokio::test]
    async fn binding_twice_does_not_duplicate_delivery() {
        let broker = InMemoryBroker::new();
        broker.bind("q", "ex", "rk");
        broker.bind("q", "ex", "rk");
        let (handler, mut rx) = ChannelHandler::new();
        broker.subscribe("q", Arc::new(handler)).await.unwrap();

        broker.publish("ex", "rk", &Message::new("once")).await.unwrap();

        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_some());
        assert!(
            timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }
}
