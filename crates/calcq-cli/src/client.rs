//! `calcq client` - 対話プロンプト
//!
//! 結果の受信は別タスク。受信側は自分が投げた id の結果だけを表示し、
//! 知らない id の結果は捨てる（同じ queue を他の client が購読していても混ざらない）。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use calcq_core::app::{Matched, ResultConsumer, ResultTracker, TaskPublisher};
use calcq_core::config::Settings;
use calcq_core::domain::{CalcResult, ConsumeError, Outcome};
use calcq_core::impls::AmqpBroker;
use calcq_core::ports::{SystemClock, UlidGenerator};

use crate::command::{self, Command};

const PROMPT: &str = "Command: ";

#[derive(Debug, Args)]
pub struct ClientArgs {
    /// Warn about submissions still unanswered after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

type SharedTracker = Arc<Mutex<ResultTracker<SystemClock>>>;

fn lock(tracker: &SharedTracker) -> MutexGuard<'_, ResultTracker<SystemClock>> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

pub async fn run(settings: Settings, args: ClientArgs) -> anyhow::Result<()> {
    let broker = Arc::new(
        AmqpBroker::connect(&settings.rabbitmq)
            .await
            .context("failed to connect to RabbitMQ")?,
    );
    let topology = settings.topology();
    let tracker: SharedTracker = Arc::new(Mutex::new(ResultTracker::new(SystemClock)));

    let listener = {
        let tracker = Arc::clone(&tracker);
        ResultConsumer::new(broker.clone(), topology.clone())
            .spawn_listener(move |result| report(&mut lock(&tracker), &result))
            .await
            .context("failed to subscribe to results")?
    };
    let sweeper = spawn_sweeper(Arc::clone(&tracker), Duration::from_secs(args.timeout_secs));

    let publisher = TaskPublisher::new(
        broker.clone(),
        Arc::new(UlidGenerator::new(SystemClock)),
        topology,
    );
    let outcome = prompt_loop(&publisher, &tracker, listener).await;

    sweeper.abort();
    if let Err(e) = broker.close().await {
        tracing::warn!(error = %e, "failed to close connection");
    }
    outcome
}

async fn prompt_loop(
    publisher: &TaskPublisher,
    tracker: &SharedTracker,
    mut listener: JoinHandle<ConsumeError>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(PROMPT.as_bytes()).await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            terminal = &mut listener => {
                let e = terminal.context("result listener panicked")?;
                return Err(e).context("result listener stopped");
            }
        };

        // stdin が閉じたら EXIT と同じ扱い
        let Some(line) = line else {
            tracing::info!("Exit OK.");
            return Ok(());
        };

        match command::parse(&line) {
            Ok(Command::Empty) => {}
            Ok(Command::Exit) => {
                tracing::info!("Exit OK.");
                return Ok(());
            }
            Ok(Command::Calc(expression)) => {
                let task = publisher.prepare(&expression);
                let id = task.correlation_id.clone();
                lock(tracker).track(id.clone(), expression);

                match publisher.publish(&task).await {
                    Ok(()) => {
                        stdout.write_all(format!("{id}\n").as_bytes()).await?;
                    }
                    Err(e) => {
                        lock(tracker).forget(&id);
                        tracing::error!(error = %e, "failed to submit");
                    }
                }
            }
            Err(e) => tracing::error!("{e}"),
        }
    }
}

fn report(tracker: &mut ResultTracker<SystemClock>, result: &CalcResult) {
    let id = &result.correlation_id;
    match tracker.observe(result) {
        Matched::First { expression, elapsed } => match &result.outcome {
            Outcome::Value(value) => tracing::info!(
                correlation_id = %id,
                expression = %expression,
                elapsed_ms = elapsed.num_milliseconds(),
                "Result: {value}"
            ),
            Outcome::Error(message) => tracing::warn!(
                correlation_id = %id,
                expression = %expression,
                elapsed_ms = elapsed.num_milliseconds(),
                "Error: {message}"
            ),
        },
        Matched::Duplicate { expression } => {
            tracing::debug!(correlation_id = %id, expression = %expression, "duplicate result ignored");
        }
        Matched::Unknown => {
            tracing::debug!(correlation_id = %id, "result for unknown id ignored");
        }
    }
}

fn spawn_sweeper(tracker: SharedTracker, timeout: Duration) -> JoinHandle<()> {
    // 範囲外なら期限切れ判定はしない
    let Ok(older_than) = chrono::Duration::from_std(timeout) else {
        return tokio::spawn(async {});
    };

    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(timeout.max(Duration::from_secs(1)));
        loop {
            ticks.tick().await;
            for (id, expression) in lock(&tracker).expire(older_than) {
                tracing::warn!(
                    correlation_id = %id,
                    expression = %expression,
                    timeout_secs = timeout.as_secs(),
                    "no result received, giving up"
                );
            }
        }
    })
}
