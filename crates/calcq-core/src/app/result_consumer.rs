//! ResultConsumer - result queue を購読して `CalcResult` のストリームにする
//!
//! # 方針
//! - フィルタ・バッファ・重複排除はしない（呼び出し側の責務。`ResultTracker` を参照）
//! - 読めない payload は `ConsumeError::Decode` として流し、ストリームは続ける
//! - 配送チャネルが閉じたら `ConsumeError::ChannelClosed` を 1 回流して終わる

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;

use crate::domain::{CalcResult, ConsumeError, Topology};
use crate::ports::{Broker, DeliveryStream, Message};

pub type ResultStream = BoxStream<'static, Result<CalcResult, ConsumeError>>;

pub struct ResultConsumer {
    broker: Arc<dyn Broker>,
    topology: Topology,
}

impl ResultConsumer {
    pub fn new(broker: Arc<dyn Broker>, topology: Topology) -> Self {
        Self { broker, topology }
    }

    /// Subscribe to the result queue (automatic acknowledgement).
    pub async fn subscribe(&self) -> Result<ResultStream, ConsumeError> {
        let queue = self.topology.result_queue.clone();
        let deliveries = self
            .broker
            .consume(&queue)
            .await
            .map_err(|source| ConsumeError::Subscribe {
                queue: queue.clone(),
                source,
            })?;

        Ok(decode_stream(queue, deliveries))
    }

    /// Subscribe, then hand every decoded result to `on_result` on a background task.
    ///
    /// The task finishes with the terminal error once the channel closes.
    pub async fn spawn_listener<F>(
        &self,
        mut on_result: F,
    ) -> Result<JoinHandle<ConsumeError>, ConsumeError>
    where
        F: FnMut(CalcResult) + Send + 'static,
    {
        let mut results = self.subscribe().await?;

        Ok(tokio::spawn(async move {
            while let Some(next) = results.next().await {
                match next {
                    Ok(result) => on_result(result),
                    Err(e) if e.is_terminal() => {
                        tracing::error!(error = %e, "result channel is closed");
                        return e;
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping undecodable result"),
                }
            }
            // decode_stream は終端エラーを流してから終わるので通常ここには来ない
            ConsumeError::ChannelClosed {
                queue: String::new(),
                reason: "result stream ended".to_string(),
            }
        }))
    }
}

fn decode(message: &Message) -> Result<CalcResult, ConsumeError> {
    CalcResult::from_json(&message.body).map_err(|e| {
        ConsumeError::Decode(format!(
            "{e} (payload: {})",
            String::from_utf8_lossy(&message.body)
        ))
    })
}

fn decode_stream(queue: String, deliveries: DeliveryStream) -> ResultStream {
    futures::stream::unfold(Some(deliveries), move |state| {
        let queue = queue.clone();
        async move {
            let mut deliveries = state?;
            match deliveries.next().await {
                Some(Ok(message)) => Some((decode(&message), Some(deliveries))),
                Some(Err(e)) => Some((
                    Err(ConsumeError::ChannelClosed {
                        queue,
                        reason: e.to_string(),
                    }),
                    None,
                )),
                None => Some((
                    Err(ConsumeError::ChannelClosed {
                        queue,
                        reason: "delivery stream ended".to_string(),
                    }),
                    None,
                )),
            }
        }
    })
    .boxed()
}
