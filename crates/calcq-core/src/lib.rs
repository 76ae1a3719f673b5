//! calcq-core
//!
//! Distributed evaluation of arithmetic expressions over a message broker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, outcome, topology, errors）
//! - **ports**: 抽象化レイヤー（Broker, Evaluator, IdGenerator, Clock）
//! - **app**: アプリケーションロジック（topology, publisher, worker_loop, result_consumer, tracker）
//! - **impls**: 実装（AmqpBroker, InMemoryBroker, ExprEvaluator）
//! - **config**: 起動時に読む Settings
//! - **observability**: tracing の初期化と worker のカウンタ
//!
//! # 流れ
//! ```text
//! client ──TaskPublisher──▶ exchange ──(tasks)──▶ WorkerLoop × N
//!                                                     │ Evaluator
//! client ◀─ResultConsumer── exchange ◀─(results)──────┘
//! ```

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;
pub mod config;
pub mod observability;
