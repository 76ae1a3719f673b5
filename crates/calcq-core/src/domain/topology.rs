//! Topology: exchange + task queue + result queue.

use serde::{Deserialize, Serialize};

/// The broker-side routing primitives used for task distribution.
///
/// 各 queue は exchange に自分の名前を routing key として bind されます。
/// したがって `task_queue` / `result_queue` はそのまま publish 時の routing key です。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub exchange: String,
    pub task_queue: String,
    pub result_queue: String,
}

impl Topology {
    pub fn new(
        exchange: impl Into<String>,
        task_queue: impl Into<String>,
        result_queue: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            task_queue: task_queue.into(),
            result_queue: result_queue.into(),
        }
    }

    pub fn task_routing_key(&self) -> &str {
        &self.task_queue
    }

    pub fn result_routing_key(&self) -> &str {
        &self.result_queue
    }

    /// (queue, routing_key) の組。bind はこの 2 件だけ
    pub fn bindings(&self) -> [(&str, &str); 2] {
        [
            (self.task_queue.as_str(), self.task_queue.as_str()),
            (self.result_queue.as_str(), self.result_queue.as_str()),
        ]
    }
}
