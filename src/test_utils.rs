//! Test doubles for the broker capabilities.

use crate::broker::{MessageHandler, Publisher};
use crate::error::RelayError;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub message: Message,
}

/// Records every publish in call order.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), RelayError> {
        self.published.lock().unwrap().push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}

/// Fails every publish the way a closed broker channel would.
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(
        &self,
        _exchange: &str,
        _routing_key: &str,
        _message: &Message,
    ) -> Result<(), RelayError> {
        Err(RelayError::ChannelClosed("broker unavailable".to_string()))
    }
}

/// Forwards every handled message to a channel.
pub struct ChannelHandler {
    sender: UnboundedSender<Message>,
}

impl ChannelHandler {
    pub fn new() -> (Self, UnboundedReceiver<Message>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl MessageHandler for ChannelHandler {
    async fn handle(&self, message: Message) -> Result<(), RelayError> {
        let _ = self.sender.send(message);
        Ok(())
    }
}
