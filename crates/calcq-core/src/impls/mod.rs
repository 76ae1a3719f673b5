//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **AmqpBroker**: RabbitMQ（lapin）上の Broker
//! - **InMemoryBroker**: テスト・ローカル用の Broker
//! - **ExprEvaluator**: 算術式の評価エンジン

pub mod amqp;
pub mod expr;
pub mod inmem_broker;

// 主要な型を再エクスポート
pub use self::amqp::AmqpBroker;
pub use self::expr::ExprEvaluator;
pub use self::inmem_broker::InMemoryBroker;
