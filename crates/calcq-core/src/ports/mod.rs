//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」です。
//! broker（RabbitMQ / InMemory）、評価エンジン、時刻、ID 生成を trait で切り離し、
//! app 層のコンポーネントを個別にテストできるようにします。

pub mod broker;
pub mod clock;
pub mod evaluator;
pub mod id_generator;

pub use self::broker::{Broker, DeliveryStream, Message};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::evaluator::Evaluator;
pub use self::id_generator::{IdGenerator, UlidGenerator};
