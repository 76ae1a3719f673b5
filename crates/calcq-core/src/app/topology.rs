//! TopologyManager - broker 側のルーティング構成
//!
//! # フロー
//! 1. reset: exchange と 2 つの queue を削除（存在しなければ成功扱い）
//! 2. ensure: exchange を宣言 → queue を宣言 → 各 queue を自分の名前で bind
//!
//! どちらも何度呼んでも同じ構成に収束します。失敗はプロセスにとって致命的です。

use std::sync::Arc;

use crate::domain::{BrokerError, Topology, TopologyError};
use crate::ports::Broker;

pub struct TopologyManager {
    broker: Arc<dyn Broker>,
}

impl TopologyManager {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Delete the exchange and both queues, ignoring "not found".
    pub async fn reset(&self, topology: &Topology) -> Result<(), TopologyError> {
        ignore_not_found(self.broker.delete_exchange(&topology.exchange).await).map_err(
            |source| TopologyError::Delete {
                kind: "exchange",
                name: topology.exchange.clone(),
                source,
            },
        )?;

        for queue in [&topology.task_queue, &topology.result_queue] {
            ignore_not_found(self.broker.delete_queue(queue).await).map_err(|source| {
                TopologyError::Delete {
                    kind: "queue",
                    name: queue.clone(),
                    source,
                }
            })?;
        }

        tracing::debug!(exchange = %topology.exchange, "topology reset");
        Ok(())
    }

    /// Declare the exchange and both queues, then bind each queue under its own name.
    pub async fn ensure(&self, topology: &Topology) -> Result<(), TopologyError> {
        self.broker
            .declare_exchange(&topology.exchange)
            .await
            .map_err(|source| TopologyError::Declare {
                kind: "exchange",
                name: topology.exchange.clone(),
                source,
            })?;

        for queue in [&topology.task_queue, &topology.result_queue] {
            self.broker
                .declare_queue(queue)
                .await
                .map_err(|source| TopologyError::Declare {
                    kind: "queue",
                    name: queue.clone(),
                    source,
                })?;
        }

        for (queue, routing_key) in topology.bindings() {
            self.broker
                .bind_queue(queue, &topology.exchange, routing_key)
                .await
                .map_err(|source| TopologyError::Bind {
                    queue: queue.to_string(),
                    exchange: topology.exchange.clone(),
                    source,
                })?;
        }

        tracing::info!(
            exchange = %topology.exchange,
            task_queue = %topology.task_queue,
            result_queue = %topology.result_queue,
            "topology ready"
        );
        Ok(())
    }

    /// reset → ensure（ワーカー起動時の手順）
    pub async fn initialize(&self, topology: &Topology) -> Result<(), TopologyError> {
        self.reset(topology).await?;
        self.ensure(topology).await
    }
}

fn ignore_not_found(result: Result<(), BrokerError>) -> Result<(), BrokerError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
