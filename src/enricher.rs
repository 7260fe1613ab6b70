use crate::broker::{MessageHandler, Publisher};
use crate::error::RelayError;
use crate::message::{ENRICHED_BY, Message};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Consumer side handler: stamps each input message and forwards it to the output key.
pub struct Enricher {
    publisher: Arc<dyn Publisher>,
    exchange: String,
    routing_key: String,
}

impl Enricher {
    pub fn new(publisher: Arc<dyn Publisher>, exchange: &str, routing_key: &str) -> Self {
        Self {
            publisher,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        }
    }
}

#[async_trait]
impl MessageHandler for Enricher {
    async fn handle(&self, message: Message) -> Result<(), RelayError> {
        info!(
            event = "message_received",
            message_id = %message.id,
            "Received message from input queue"
        );

        let enriched = message.enriched(ENRICHED_BY);

        info!(
            event = "message_enriched",
            message_id = %enriched.id,
            enriched_by = ENRICHED_BY,
            routing_key = %self.routing_key,
            "Sending enriched message to output queue"
        );
        self.publisher
            .publish(&self.exchange, &self.routing_key, &enriched)
            .await
    }
}
