//! InMemoryBroker - 開発・テスト用の broker
//!
//! # 挙動
//! - exchange は direct 型のみ（routing key 完全一致で bind 済み queue に配送）
//! - `""` はデフォルト exchange（routing key = queue 名）
//! - 1 つの queue に複数 consumer がいる場合、各メッセージはどれか 1 つにだけ届く
//! - queue を削除すると、その queue の consumer のストリームは終わる
//! - `close()` で接続断を再現できる

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::domain::BrokerError;
use crate::ports::{Broker, DeliveryStream, Message};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>;

struct QueueState {
    tx: mpsc::UnboundedSender<Message>,
    rx: SharedReceiver,
}

impl QueueState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    /// exchange 名 → (queue, routing_key) の集合
    exchanges: HashMap<String, BTreeSet<(String, String)>>,
    queues: HashMap<String, QueueState>,
    failing_routing_keys: BTreeSet<String>,
    closed: bool,
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 接続断を再現する。全 consumer のストリームが終わり、以降の操作は失敗する
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.queues.clear();
        state.exchanges.clear();
    }

    /// 指定 routing key への publish を失敗させる
    pub fn fail_publishes_to(&self, routing_key: &str) {
        self.state()
            .failing_routing_keys
            .insert(routing_key.to_string());
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    /// exchange の bind 一覧（queue, routing_key）をソート済みで返す
    pub fn bindings(&self, exchange: &str) -> Option<Vec<(String, String)>> {
        self.state()
            .exchanges
            .get(exchange)
            .map(|bindings| bindings.iter().cloned().collect())
    }

    fn ensure_open(state: &BrokerState) -> Result<(), BrokerError> {
        if state.closed {
            return Err(BrokerError::ChannelClosed("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        state.exchanges.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        state
            .exchanges
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{name}'")))
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        state
            .queues
            .entry(name.to_string())
            .or_insert_with(QueueState::new);
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        if state.queues.remove(name).is_none() {
            return Err(BrokerError::NotFound(format!("queue '{name}'")));
        }
        for bindings in state.exchanges.values_mut() {
            bindings.retain(|(queue, _)| queue != name);
        }
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::NotFound(format!("queue '{queue}'")));
        }
        let bindings = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?;
        bindings.insert((queue.to_string(), routing_key.to_string()));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<(), BrokerError> {
        let state = self.state();
        Self::ensure_open(&state)?;
        if state.failing_routing_keys.contains(routing_key) {
            return Err(BrokerError::operation("publish", "rejected by broker"));
        }

        let targets: Vec<&str> = if exchange.is_empty() {
            vec![routing_key]
        } else {
            state
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?
                .iter()
                .filter(|(_, key)| key == routing_key)
                .map(|(queue, _)| queue.as_str())
                .collect()
        };

        let mut routed = false;
        for queue in targets {
            if let Some(q) = state.queues.get(queue) {
                // receiver は QueueState が保持しているので send は失敗しない
                routed |= q.tx.send(message.clone()).is_ok();
            }
        }
        if !routed {
            tracing::debug!(exchange, routing_key, "message was unroutable and dropped");
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let rx = {
            let state = self.state();
            Self::ensure_open(&state)?;
            state
                .queues
                .get(queue)
                .map(|q| q.rx.clone())
                .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?
        };

        let stream = futures::stream::unfold(rx, |rx| async move {
            let message = rx.lock().await.recv().await;
            message.map(|m| (Ok(m), rx))
        });
        Ok(stream.boxed())
    }
}
