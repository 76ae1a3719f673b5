//! `calcq worker`

use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use calcq_core::app::{TopologyManager, WorkerGroup};
use calcq_core::config::Settings;
use calcq_core::impls::{AmqpBroker, ExprEvaluator};

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Number of independent worker loops (each has its own consumer channel)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,
}

pub async fn run(settings: Settings, args: WorkerArgs) -> anyhow::Result<()> {
    let broker = Arc::new(
        AmqpBroker::connect(&settings.rabbitmq)
            .await
            .context("failed to connect to RabbitMQ")?,
    );
    let topology = settings.topology();
    TopologyManager::new(broker.clone())
        .initialize(&topology)
        .await
        .context("failed to initialize topology")?;

    tracing::info!(url = %broker.url_redacted(), workers = args.workers, "starting workers");
    let group = WorkerGroup::spawn(
        usize::from(args.workers),
        broker.clone(),
        Arc::new(ExprEvaluator::new()),
        topology,
    );

    let shutdown = group.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.shutdown();
        }
    });

    let result = group.join().await;
    if let Err(e) = broker.close().await {
        tracing::warn!(error = %e, "failed to close connection");
    }
    result.context("worker stopped")
}
