//! WorkerLoop - task を 1 件ずつ評価して result を返すループ
//!
//! # フロー（1 件ごと）
//! 1. body の前後の空白を除く
//! 2. Evaluator で評価
//! 3. 成功 → `ok: true` / 失敗 → `ok: false` + エラーメッセージ（ループは止めない）
//! 4. JSON にエンコード。失敗したら最小限のエンベロープを手組みして代わりに送る
//! 5. result queue に publish。失敗したらログを出して次へ（リトライしない）
//!
//! # 自動 ack
//! 配送された瞬間に処理済みとみなされます。評価中にクラッシュした task は失われます。
//!
//! # 終了条件
//! 配送チャネルが閉じたとき（`WorkerError::ChannelClosed`）と、shutdown 要求のときだけ。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::domain::outcome::RESULT_CONTENT_TYPE;
use crate::domain::{CalcResult, Task, Topology, WorkerError};
use crate::observability::WorkerCounts;
use crate::ports::{Broker, Evaluator, Message};

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    encode_fallbacks: AtomicU64,
    publish_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerCounts {
        WorkerCounts {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            encode_fallbacks: self.encode_fallbacks.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

/// One sequential consumer of the task queue.
///
/// 複数インスタンスを同じ task queue に向ければ broker が負荷分散します。
/// インスタンス間で共有する状態はありません。
pub struct WorkerLoop {
    worker_id: usize,
    broker: Arc<dyn Broker>,
    evaluator: Arc<dyn Evaluator>,
    topology: Topology,
    counters: Arc<Counters>,
}

impl WorkerLoop {
    pub fn new(broker: Arc<dyn Broker>, evaluator: Arc<dyn Evaluator>, topology: Topology) -> Self {
        Self {
            worker_id: 0,
            broker,
            evaluator,
            topology,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn counts(&self) -> WorkerCounts {
        self.counters.snapshot()
    }

    /// Consume tasks until the delivery channel closes or shutdown is requested.
    ///
    /// shutdown の場合は `Ok(())`、チャネル喪失の場合は `WorkerError` を返します。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let queue = self.topology.task_queue.clone();
        let mut deliveries = self
            .broker
            .consume(&queue)
            .await
            .map_err(|source| WorkerError::Subscribe {
                queue: queue.clone(),
                source,
            })?;

        tracing::info!(worker_id = self.worker_id, queue = %queue, "Starting main loop...");

        loop {
            if *shutdown.borrow() {
                tracing::info!(worker_id = self.worker_id, "shutdown requested");
                return Ok(());
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    // sender が drop されたら止める手段がないので終了扱い
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(message)) => self.handle_delivery(message).await,
                Some(Err(e)) => {
                    tracing::error!(worker_id = self.worker_id, error = %e, "task channel is closed");
                    return Err(WorkerError::ChannelClosed {
                        queue,
                        reason: e.to_string(),
                    });
                }
                None => {
                    tracing::error!(worker_id = self.worker_id, "task channel is closed");
                    return Err(WorkerError::ChannelClosed {
                        queue,
                        reason: "delivery stream ended".to_string(),
                    });
                }
            }
        }
    }

    /// Process one delivered task: evaluate, encode, publish.
    pub async fn handle_delivery(&self, message: Message) {
        let task = Task::from_delivery(message.message_id.as_deref(), &message.body);
        if task.correlation_id.is_empty() {
            tracing::warn!(
                worker_id = self.worker_id,
                body = %task.body,
                "task has no correlation id; result will carry an empty id"
            );
        }

        let result = self.evaluate(&task);
        let payload = self.encode(&result);

        tracing::debug!(
            correlation_id = %task.correlation_id,
            expression = task.expression(),
            payload = %String::from_utf8_lossy(&payload),
            "Publishing result..."
        );

        let message = Message::new(payload).with_content_type(RESULT_CONTENT_TYPE);
        match self
            .broker
            .publish(
                &self.topology.exchange,
                self.topology.result_routing_key(),
                message,
            )
            .await
        {
            Ok(()) => {
                tracing::info!(
                    correlation_id = %task.correlation_id,
                    expression = task.expression(),
                    ok = result.is_ok(),
                    "Result published"
                );
            }
            Err(e) => {
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    correlation_id = %task.correlation_id,
                    error = %e,
                    "failed to publish result"
                );
            }
        }
    }

    /// Evaluate a task. Evaluation failures become `ok: false` results.
    pub fn evaluate(&self, task: &Task) -> CalcResult {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        match self.evaluator.evaluate(task.expression()) {
            Ok(value) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                CalcResult::success(task.correlation_id.clone(), value)
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                CalcResult::failure(task.correlation_id.clone(), e.to_string())
            }
        }
    }

    /// JSON payload for a result, or the fallback envelope if encoding fails.
    pub fn encode(&self, result: &CalcResult) -> Vec<u8> {
        match result.to_json() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.encode_fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    correlation_id = %result.correlation_id,
                    error = %e,
                    "failed to encode result, sending fallback envelope"
                );
                CalcResult::fallback_envelope(
                    &result.correlation_id,
                    &format!("failed to encode result: {e}"),
                )
            }
        }
    }
}

/// Worker group handle.
/// - `request_shutdown()` で全ワーカーが次のメッセージを待つ前に止まる
/// - `join()` はいずれかのワーカーがチャネル喪失で止まると残りも止め、最初のエラーを返す
pub struct WorkerGroup {
    shutdown_tx: Arc<watch::Sender<bool>>,
    joins: JoinSet<Result<(), WorkerError>>,
    workers: Vec<Arc<WorkerLoop>>,
}

impl WorkerGroup {
    /// Spawn `n` independent workers on the same task queue.
    pub fn spawn(
        n: usize,
        broker: Arc<dyn Broker>,
        evaluator: Arc<dyn Evaluator>,
        topology: Topology,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = JoinSet::new();
        let mut workers = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Arc::new(
                WorkerLoop::new(Arc::clone(&broker), Arc::clone(&evaluator), topology.clone())
                    .with_worker_id(worker_id),
            );
            workers.push(Arc::clone(&worker));

            let rx = shutdown_rx.clone();
            joins.spawn(async move { worker.run(rx).await });
        }

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            joins,
            workers,
        }
    }

    /// Handle that can request shutdown from another task (e.g. a signal handler).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    pub fn request_shutdown(&self) {
        self.shutdown_handle().shutdown();
    }

    /// Sum of all workers' counters.
    pub fn counts(&self) -> WorkerCounts {
        self.workers
            .iter()
            .map(|w| w.counts())
            .fold(WorkerCounts::default(), WorkerCounts::merge)
    }

    /// Wait for all workers. Returns the first fatal error, stopping the others.
    pub async fn join(mut self) -> Result<(), WorkerError> {
        let mut first_error = None;
        while let Some(joined) = self.joins.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        self.request_shutdown();
                        first_error = Some(e);
                    }
                }
                Err(e) => tracing::error!(error = %e, "worker task panicked"),
            }
        }

        let counts = self.counts();
        tracing::info!(
            processed = counts.processed,
            succeeded = counts.succeeded,
            failed = counts.failed,
            encode_fallbacks = counts.encode_fallbacks,
            publish_failures = counts.publish_failures,
            "workers stopped"
        );
        first_error.map_or(Ok(()), Err)
    }
}

#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // receivers may already be dropped
        let _ = self.0.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{TaskPublisher, TopologyManager};
    use crate::domain::CorrelationId;
    use crate::impls::{ExprEvaluator, InMemoryBroker};
    use crate::ports::{DeliveryStream, SystemClock, UlidGenerator};
    use std::time::Duration;

    struct Harness {
        broker: Arc<InMemoryBroker>,
        topology: Topology,
        publisher: TaskPublisher,
        results: DeliveryStream,
    }

    async fn harness() -> Harness {
        let broker = Arc::new(InMemoryBroker::new());
        let topology = Topology::new("calc", "tasks", "results");
        TopologyManager::new(broker.clone())
            .initialize(&topology)
            .await
            .unwrap();
        let publisher = TaskPublisher::new(
            broker.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            topology.clone(),
        );
        let results = broker.consume(&topology.result_queue).await.unwrap();
        Harness {
            broker,
            topology,
            publisher,
            results,
        }
    }

    fn worker(h: &Harness) -> Arc<WorkerLoop> {
        Arc::new(WorkerLoop::new(
            h.broker.clone(),
            Arc::new(ExprEvaluator::new()),
            h.topology.clone(),
        ))
    }

    fn start(
        worker: Arc<WorkerLoop>,
    ) -> (
        watch::Sender<bool>,
        tokio::task::JoinHandle<Result<(), WorkerError>>,
    ) {
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(async move { worker.run(rx).await });
        (tx, join)
    }

    async fn next_result(results: &mut DeliveryStream) -> (Message, CalcResult) {
        let message = tokio::time::timeout(Duration::from_secs(2), results.next())
            .await
            .expect("result within timeout")
            .expect("stream open")
            .expect("delivery ok");
        let result = CalcResult::from_json(&message.body).unwrap();
        (message, result)
    }

    #[tokio::test]
    async fn evaluates_and_preserves_correlation_id() {
        let mut h = harness().await;
        let (_tx, _join) = start(worker(&h));

        let id = h.publisher.submit("2 + 3 * 4").await.unwrap();
        let (message, result) = next_result(&mut h.results).await;

        assert_eq!(result.correlation_id, id);
        assert_eq!(result.value(), Some(14.0));
        assert_eq!(message.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn invalid_expression_does_not_stop_the_loop() {
        let mut h = harness().await;
        let (_tx, _join) = start(worker(&h));

        let bad = h.publisher.submit("2 +").await.unwrap();
        let good = h.publisher.submit("1 + 1").await.unwrap();

        let (_, first) = next_result(&mut h.results).await;
        let (_, second) = next_result(&mut h.results).await;

        assert_eq!(first.correlation_id, bad);
        assert!(!first.is_ok());
        assert!(!first.error_message().unwrap().is_empty());

        assert_eq!(second.correlation_id, good);
        assert_eq!(second.value(), Some(2.0));
    }

    #[tokio::test]
    async fn non_numeric_result_is_an_error_result() {
        let mut h = harness().await;
        let (_tx, _join) = start(worker(&h));

        h.publisher.submit("2 > 1").await.unwrap();
        let (_, result) = next_result(&mut h.results).await;

        assert!(!result.is_ok());
        assert!(result.error_message().unwrap().contains("not a number"));
    }

    #[tokio::test]
    async fn body_whitespace_is_trimmed() {
        let mut h = harness().await;
        let (_tx, _join) = start(worker(&h));

        h.publisher.submit("  6 / 3 \n").await.unwrap();
        let (_, result) = next_result(&mut h.results).await;
        assert_eq!(result.value(), Some(2.0));
    }

    #[tokio::test]
    async fn unencodable_value_falls_back_to_envelope() {
        let mut h = harness().await;
        let w = worker(&h);
        let (_tx, _join) = start(w.clone());

        let id = h.publisher.submit("1 / 0").await.unwrap();
        let (message, result) = next_result(&mut h.results).await;

        assert_eq!(result.correlation_id, id);
        assert!(result.error_message().unwrap().starts_with("failed to encode result"));
        let raw: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(raw["ok"], false);
        assert_eq!(w.counts().encode_fallbacks, 1);
    }

    #[tokio::test]
    async fn task_without_id_gets_empty_id() {
        let mut h = harness().await;
        let (_tx, _join) = start(worker(&h));

        h.broker
            .publish("calc", "tasks", Message::new("3 * 3"))
            .await
            .unwrap();
        let (_, result) = next_result(&mut h.results).await;

        assert_eq!(result.correlation_id, CorrelationId::empty());
        assert_eq!(result.value(), Some(9.0));
    }

    #[tokio::test]
    async fn publish_failure_is_logged_and_skipped() {
        let h = harness().await;
        h.broker.fail_publishes_to("results");
        let w = worker(&h);
        let (_tx, join) = start(w.clone());

        h.publisher.submit("1").await.unwrap();
        h.publisher.submit("2").await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while w.counts().publish_failures < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let counts = w.counts();
        assert_eq!(counts.processed, 2);
        assert_eq!(counts.succeeded, 2);
        assert!(!join.is_finished());
    }

    #[tokio::test]
    async fn closed_channel_is_reported_to_caller() {
        let h = harness().await;
        let (_tx, join) = start(worker(&h));
        // consumer が購読を始めるまで待つ
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.broker.close();
        let err = tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, WorkerError::ChannelClosed { ref queue, .. } if queue == "tasks"));
    }

    #[tokio::test]
    async fn missing_task_queue_fails_to_subscribe() {
        let broker = Arc::new(InMemoryBroker::new());
        let w = WorkerLoop::new(
            broker,
            Arc::new(ExprEvaluator::new()),
            Topology::new("calc", "tasks", "results"),
        );
        let (_tx, rx) = watch::channel(false);
        let err = w.run(rx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Subscribe { .. }));
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_cleanly() {
        let h = harness().await;
        let (tx, join) = start(worker(&h));

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn worker_group_shares_the_task_queue() {
        let mut h = harness().await;
        let group = WorkerGroup::spawn(
            3,
            h.broker.clone(),
            Arc::new(ExprEvaluator::new()),
            h.topology.clone(),
        );

        let mut submitted = Vec::new();
        for i in 0..10 {
            submitted.push(h.publisher.submit(&format!("{i} * 2")).await.unwrap());
        }

        let mut seen = Vec::new();
        for _ in 0..10 {
            let (_, result) = next_result(&mut h.results).await;
            seen.push(result.correlation_id);
        }
        submitted.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        seen.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(seen, submitted);
        assert_eq!(group.counts().processed, 10);

        group.request_shutdown();
        group.join().await.unwrap();
    }

    #[tokio::test]
    async fn worker_group_reports_lost_connection() {
        let h = harness().await;
        let group = WorkerGroup::spawn(
            2,
            h.broker.clone(),
            Arc::new(ExprEvaluator::new()),
            h.topology.clone(),
        );
        // consumer が購読を始めるまで待つ
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.broker.close();
        let err = tokio::time::timeout(Duration::from_secs(2), group.join())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, WorkerError::ChannelClosed { .. }));
    }
}
