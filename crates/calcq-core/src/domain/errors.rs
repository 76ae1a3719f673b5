//! Errors - エラー型と分類
//!
//! # 分類
//! - **Topology / Connection**: 起動時の致命的エラー（プロセスが判断する）
//! - **Publish**: その 1 件だけ失われる（ログを出して次へ）
//! - **Eval**: 想定内の結果。`ok: false` の Result として表現され、ループには伝播しない
//! - **ChannelClosed**: 配送チャネル喪失。呼び出し側へ型付きで返す

use thiserror::Error;

/// Broker 操作のエラー
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },
}

impl BrokerError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Topology の reset / ensure に失敗した
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to delete {kind} '{name}': {source}")]
    Delete {
        kind: &'static str,
        name: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to declare {kind} '{name}': {source}")]
    Declare {
        kind: &'static str,
        name: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to bind queue '{queue}' to exchange '{exchange}': {source}")]
    Bind {
        queue: String,
        exchange: String,
        #[source]
        source: BrokerError,
    },
}

/// Task の publish に失敗した（内部リトライはしない）
#[derive(Debug, Error)]
#[error("failed to publish message to '{exchange}' with key '{routing_key}': {source}")]
pub struct PublishError {
    pub exchange: String,
    pub routing_key: String,
    #[source]
    pub source: BrokerError,
}

/// Result の購読エラー
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// 購読を開始できなかった
    #[error("failed to consume from '{queue}': {source}")]
    Subscribe {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// 1 件の payload が Result として読めなかった（ストリームは継続する）
    #[error("failed to decode result message: {0}")]
    Decode(String),

    /// 配送チャネルが閉じた（終端）
    #[error("channel for '{queue}' is closed: {reason}")]
    ChannelClosed { queue: String, reason: String },
}

impl ConsumeError {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// WorkerLoop を止める唯一の条件
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to consume from '{queue}': {source}")]
    Subscribe {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("channel for '{queue}' is closed: {reason}")]
    ChannelClosed { queue: String, reason: String },
}

/// 評価エンジンのエラー（parse / evaluate / 非数値）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("failed to compile formula {formula}: {message}")]
    Compile { formula: String, message: String },

    #[error("failed to evaluate formula {formula}: {message}")]
    Evaluate { formula: String, message: String },

    #[error("result is not a number for formula {formula} (got {kind})")]
    NotANumber { formula: String, kind: &'static str },
}
