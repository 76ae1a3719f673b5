//! AmqpBroker - RabbitMQ 上の Broker 実装（lapin）
//!
//! # channel の使い分け
//! - **control**: declare / bind / publish 用。lapin の Channel は並行利用に安全
//! - **consume**: consumer ごとに専用 channel を開く
//! - **delete**: 削除ごとに使い捨ての channel を開く。
//!   存在しない対象への削除は NOT_FOUND で channel ごと閉じられるため、
//!   control channel を巻き込まないようにしている

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, ExchangeDeleteOptions,
    QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::domain::BrokerError;
use crate::ports::{Broker, DeliveryStream, Message};

/// RabbitMQ-based broker over a single AMQP connection.
pub struct AmqpBroker {
    connection: Connection,
    control: Channel,
    url: String,
}

impl AmqpBroker {
    /// Dial the broker and open the control channel.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(
            url,
            ConnectionProperties::default().with_connection_name("calcq".into()),
        )
        .await
        .map_err(|e| BrokerError::Connection(format!("RabbitMQ connection failed: {e}")))?;

        let control = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("RabbitMQ channel creation failed: {e}")))?;

        tracing::info!(url = %redact(url), "connected to RabbitMQ");

        Ok(Self {
            connection,
            control,
            url: url.to_string(),
        })
    }

    /// Connection URL with credentials hidden, for logging.
    pub fn url_redacted(&self) -> String {
        redact(&self.url)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn open_channel(&self) -> Result<Channel, BrokerError> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| classify("create_channel", e))
    }

    /// Close the connection (all channels and consumers end).
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection
            .close(200, "bye")
            .await
            .map_err(|e| classify("close", e))
    }
}

fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

fn classify(operation: &str, err: lapin::Error) -> BrokerError {
    let text = err.to_string();
    if text.contains("NOT_FOUND") || text.contains("404") {
        return BrokerError::NotFound(text);
    }
    match err {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::ChannelClosed(text)
        }
        _ => BrokerError::operation(operation, text),
    }
}

fn to_message(delivery: lapin::message::Delivery) -> Message {
    let properties = &delivery.properties;
    Message {
        content_type: properties
            .content_type()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        message_id: properties
            .message_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        body: delivery.data,
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.control
            .exchange_declare(
                name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify("exchange_declare", e))
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let channel = self.open_channel().await?;
        let result = channel
            .exchange_delete(name, ExchangeDeleteOptions::default())
            .await
            .map_err(|e| classify("exchange_delete", e));
        // NOT_FOUND の後は channel が既に閉じている
        let _ = channel.close(200, "OK").await;
        result
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.control
            .queue_declare(name, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| classify("queue_declare", e))
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        let channel = self.open_channel().await?;
        let result = channel
            .queue_delete(name, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| classify("queue_delete", e));
        let _ = channel.close(200, "OK").await;
        result
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.control
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify("queue_bind", e))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default();
        if let Some(content_type) = message.content_type {
            properties = properties.with_content_type(content_type.into());
        }
        if let Some(message_id) = message.message_id {
            properties = properties.with_message_id(message_id.into());
        }

        let confirm = self
            .control
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| classify("basic_publish", e))?;

        confirm
            .await
            .map(|_| ())
            .map_err(|e| classify("publish_confirm", e))
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let channel = self.open_channel().await?;
        let consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify("basic_consume", e))?;

        // ストリームが生きている間は channel を保持する
        let stream = consumer.map(move |delivery| {
            let _channel = &channel;
            delivery
                .map(to_message)
                .map_err(|e| BrokerError::ChannelClosed(e.to_string()))
        });
        Ok(stream.boxed())
    }
}
