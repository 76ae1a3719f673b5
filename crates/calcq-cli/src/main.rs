//! calcq - distributed calculator over RabbitMQ
//!
//! - `calcq worker`: topology を初期化して task を評価し続ける
//! - `calcq client`: 対話プロンプトから式を投げ、結果を表示する

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use calcq_core::config::Settings;
use calcq_core::observability::init_tracing;

mod client;
mod command;
mod worker;

#[derive(Debug, Parser)]
#[command(name = "calcq", version, about = "Evaluate arithmetic expressions on remote workers")]
struct Cli {
    /// Config file (optional; CALCQ_* environment variables override it)
    #[arg(long, global = true, default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Provision the topology and evaluate incoming tasks
    Worker(worker::WorkerArgs),
    /// Interactive prompt: CALC <expression> | EXIT
    Client(client::ClientArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fatal");
            eprintln!("calcq: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config))?;
    init_tracing(&settings.log_level)?;

    match cli.mode {
        Mode::Worker(args) => worker::run(settings, args).await,
        Mode::Client(args) => client::run(settings, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults_to_one_loop() {
        let cli = Cli::try_parse_from(["calcq", "worker"]).unwrap();
        let Mode::Worker(args) = cli.mode else {
            panic!("expected worker mode");
        };
        assert_eq!(args.workers, 1);
        assert_eq!(cli.config, "config.yaml");
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["calcq", "client", "--config", "/etc/calcq.yaml"]).unwrap();
        assert_eq!(cli.config, "/etc/calcq.yaml");
        assert!(matches!(cli.mode, Mode::Client(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(Cli::try_parse_from(["calcq", "worker", "--workers", "0"]).is_err());
    }
}
