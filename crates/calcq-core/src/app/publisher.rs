//! TaskPublisher - 式を Task として task queue に送る
//!
//! # フロー
//! 1. IdGenerator で correlation id を払い出す
//! 2. body はそのまま、id は message_id メタデータに載せる（body には埋め込まない）
//! 3. exchange に task queue の routing key で publish
//!
//! 評価は待たずに id を返します。失敗時のリトライは呼び出し側が決めます。

use std::sync::Arc;

use crate::domain::task::TASK_CONTENT_TYPE;
use crate::domain::{CorrelationId, PublishError, Task, Topology};
use crate::ports::{Broker, IdGenerator, Message};

pub struct TaskPublisher {
    broker: Arc<dyn Broker>,
    ids: Arc<dyn IdGenerator>,
    topology: Topology,
}

impl TaskPublisher {
    pub fn new(broker: Arc<dyn Broker>, ids: Arc<dyn IdGenerator>, topology: Topology) -> Self {
        Self {
            broker,
            ids,
            topology,
        }
    }

    /// Submit an expression; returns its correlation id without waiting for a result.
    pub async fn submit(&self, body: &str) -> Result<CorrelationId, PublishError> {
        let task = self.prepare(body);
        self.publish(&task).await?;
        Ok(task.correlation_id)
    }

    /// Build a Task with a fresh id without publishing it.
    ///
    /// 結果より先に id を登録しておきたい呼び出し側向け（`ResultTracker::track` → `publish`）
    pub fn prepare(&self, body: &str) -> Task {
        Task::new(self.ids.new_id(), body)
    }

    /// Publish an already-built Task (its id is kept as is).
    pub async fn publish(&self, task: &Task) -> Result<(), PublishError> {
        let message = Message::new(task.body.as_bytes())
            .with_content_type(TASK_CONTENT_TYPE)
            .with_message_id(task.correlation_id.as_str());

        let routing_key = self.topology.task_routing_key();
        self.broker
            .publish(&self.topology.exchange, routing_key, message)
            .await
            .map_err(|source| PublishError {
                exchange: self.topology.exchange.clone(),
                routing_key: routing_key.to_string(),
                source,
            })?;

        tracing::debug!(correlation_id = %task.correlation_id, body = %task.body, "task published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TopologyManager;
    use crate::impls::InMemoryBroker;
    use crate::ports::{SystemClock, UlidGenerator};
    use futures::StreamExt;

    async fn setup() -> (Arc<InMemoryBroker>, TaskPublisher, Topology) {
        let broker = Arc::new(InMemoryBroker::new());
        let topology = Topology::new("calc", "tasks", "results");
        TopologyManager::new(broker.clone())
            .ensure(&topology)
            .await
            .unwrap();
        let publisher = TaskPublisher::new(
            broker.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            topology.clone(),
        );
        (broker, publisher, topology)
    }

    #[tokio::test]
    async fn submit_carries_id_as_metadata() {
        let (broker, publisher, topology) = setup().await;
        let mut tasks = broker.consume(&topology.task_queue).await.unwrap();

        let id = publisher.submit("2 + 3 * 4").await.unwrap();

        let message = tasks.next().await.unwrap().unwrap();
        assert_eq!(message.body, b"2 + 3 * 4");
        assert_eq!(message.message_id.as_deref(), Some(id.as_str()));
        assert_eq!(message.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn each_submit_gets_a_fresh_id() {
        let (_broker, publisher, _topology) = setup().await;
        let a = publisher.submit("1").await.unwrap();
        let b = publisher.submit("1").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn prepared_task_is_published_under_its_own_id() {
        let (broker, publisher, topology) = setup().await;
        let mut tasks = broker.consume(&topology.task_queue).await.unwrap();

        let task = publisher.prepare("7 % 4");
        publisher.publish(&task).await.unwrap();

        let message = tasks.next().await.unwrap().unwrap();
        assert_eq!(message.message_id.as_deref(), Some(task.correlation_id.as_str()));
    }

    #[tokio::test]
    async fn broker_failure_is_returned_to_caller() {
        let (broker, publisher, _topology) = setup().await;
        broker.fail_publishes_to("tasks");

        let err = publisher.submit("1 + 1").await.unwrap_err();
        assert_eq!(err.routing_key, "tasks");
        assert_eq!(err.exchange, "calc");
    }
}
