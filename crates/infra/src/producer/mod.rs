//! Outbound message producer.
//!
//! Every persisted chat message is forwarded once per handler run to an
//! external broker, keyed by chat. The wire payload is the JSON form of
//! [`OutboundMessage`], optionally sealed with [`MessageCipher`].

use std::sync::Mutex;

use async_trait::async_trait;
use parley_core::{ChatId, MessageId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod crypto;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use crypto::MessageCipher;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsProducer;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("broker error: {0}")]
    Broker(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub body: String,
    pub from_client: bool,
}

#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn produce_message(&self, message: OutboundMessage) -> Result<(), ProducerError>;
}

/// JSON-encode `message`, sealing it when a cipher is configured.
pub fn encode_payload(
    message: &OutboundMessage,
    cipher: Option<&MessageCipher>,
) -> Result<Vec<u8>, ProducerError> {
    let data = serde_json::to_vec(message)?;
    match cipher {
        Some(cipher) => cipher.seal(&data),
        None => Ok(data),
    }
}

/// Keeps produced messages in memory. Used in dev mode and by tests.
#[derive(Debug, Default)]
pub struct InMemoryProducer {
    produced: Mutex<Vec<OutboundMessage>>,
}

impl InMemoryProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn produced(&self) -> Vec<OutboundMessage> {
        self.produced
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl MessageProducer for InMemoryProducer {
    async fn produce_message(&self, message: OutboundMessage) -> Result<(), ProducerError> {
        tracing::debug!(message_id = %message.id, chat_id = %message.chat_id, "message produced");
        self.produced
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OutboundMessage {
        OutboundMessage {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            body: "hi".into(),
            from_client: true,
        }
    }

    #[test]
    fn plain_payload_is_camel_case_json() {
        let msg = message();
        let bytes = encode_payload(&msg, None).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["id"], msg.id.to_string());
        assert_eq!(json["chatId"], msg.chat_id.to_string());
        assert_eq!(json["body"], "hi");
        assert_eq!(json["fromClient"], true);
    }

    #[test]
    fn sealed_payload_decrypts_to_the_plain_one() {
        let cipher = MessageCipher::new(&[7u8; 32]).unwrap();
        let msg = message();

        let sealed = encode_payload(&msg, Some(&cipher)).unwrap();
        let opened: OutboundMessage = serde_json::from_slice(&cipher.open(&sealed).unwrap()).unwrap();
        assert_eq!(opened, msg);
    }

    #[tokio::test]
    async fn in_memory_producer_records_in_order() {
        let producer = InMemoryProducer::new();
        let (a, b) = (message(), message());
        producer.produce_message(a.clone()).await.unwrap();
        producer.produce_message(b.clone()).await.unwrap();
        assert_eq!(producer.produced(), vec![a, b]);
    }
}
