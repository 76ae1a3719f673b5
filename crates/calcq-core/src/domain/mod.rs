//! Domain model (correlation ids, tasks, outcomes, topology, errors).
//!
//! broker にも評価エンジンにも依存しない「形」だけを定義します。

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod task;
pub mod topology;

pub use errors::{
    BrokerError, ConsumeError, EvalError, PublishError, TopologyError, WorkerError,
};
pub use ids::CorrelationId;
pub use outcome::{CalcResult, Outcome, ResultRecord};
pub use task::Task;
pub use topology::Topology;
