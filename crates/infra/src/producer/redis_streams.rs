//! Redis Streams producer.
//!
//! One `XADD <stream_key> * chat_id <chat> payload <bytes>` per message. The
//! multiplexed connection is opened on first use and shared afterwards.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::instrument;

use super::{MessageCipher, MessageProducer, OutboundMessage, ProducerError, encode_payload};

pub const DEFAULT_STREAM_KEY: &str = "parley:messages";

#[derive(Debug)]
pub struct RedisStreamsProducer {
    client: redis::Client,
    stream_key: String,
    cipher: Option<MessageCipher>,
    conn: OnceCell<MultiplexedConnection>,
}

impl RedisStreamsProducer {
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: Option<String>,
        cipher: Option<MessageCipher>,
    ) -> Result<Self, ProducerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| ProducerError::Broker(format!("connection: {e}")))?;

        Ok(Self {
            client,
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            cipher,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, ProducerError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| ProducerError::Broker(format!("connection: {e}")))
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl MessageProducer for RedisStreamsProducer {
    #[instrument(
        skip(self, message),
        fields(
            stream_key = %self.stream_key,
            chat_id = %message.chat_id,
            message_id = %message.id
        ),
        err
    )]
    async fn produce_message(&self, message: OutboundMessage) -> Result<(), ProducerError> {
        let payload = encode_payload(&message, self.cipher.as_ref())?;
        let mut conn = self.connection().await?;

        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("chat_id")
            .arg(message.chat_id.to_string())
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| ProducerError::Broker(format!("XADD: {e}")))?;

        Ok(())
    }
}
