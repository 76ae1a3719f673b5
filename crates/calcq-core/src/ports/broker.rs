//! Broker port - exchange / queue / bind / publish / consume
//!
//! # 実装
//! - **AmqpBroker**: RabbitMQ（lapin）
//! - **InMemoryBroker**: テスト・ローカル用
//!
//! # 配送の前提
//! - at-least-once（重複はありうる）
//! - consume は自動 ack。配送された時点で処理済みとみなす

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::BrokerError;

/// 購読中のメッセージストリーム
///
/// `None` または `Err` は配送チャネルが閉じたことを意味します。
pub type DeliveryStream = BoxStream<'static, Result<Message, BrokerError>>;

/// Transport message: uninterpreted body plus message-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
            message_id: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Broker はメッセージングの基本操作を提供
///
/// # 設計原則
/// - exchange は direct 型・非永続
/// - delete は対象が無ければ `BrokerError::NotFound` を返す（無視するかは呼び出し側が決める）
/// - 実装は並行利用に安全であること（コンポーネントごとに channel を分ける）
#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError>;

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<(), BrokerError>;

    /// Start consuming `queue` with automatic acknowledgement.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;
}
