//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装します。
//! コンポーネント同士は直接呼び合わず、すべて broker を介してやり取りします。
//!
//! # 主要コンポーネント
//! - **TopologyManager**: exchange / queue / bind の reset と ensure
//! - **TaskPublisher**: 式に correlation id を付けて task queue に送る
//! - **WorkerLoop**: task を 1 件ずつ評価して result queue に返す
//! - **ResultConsumer**: result queue を購読して `CalcResult` のストリームにする
//! - **ResultTracker**: 呼び出し側の突き合わせ（未知 id・重複・タイムアウト）

pub mod publisher;
pub mod result_consumer;
pub mod topology;
pub mod tracker;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::publisher::TaskPublisher;
pub use self::result_consumer::{ResultConsumer, ResultStream};
pub use self::topology::TopologyManager;
pub use self::tracker::{Matched, ResultTracker};
pub use self::worker_loop::{ShutdownHandle, WorkerGroup, WorkerLoop};
