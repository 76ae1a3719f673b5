//! Task: one expression to evaluate, tagged with its correlation id.

use super::ids::CorrelationId;

/// Content type carried by task messages.
pub const TASK_CONTENT_TYPE: &str = "text/plain";

/// A unit of submitted work.
///
/// Task はメッセージ 1 件の間だけ存在します。
/// 再配送や保持は broker の責務で、ここではライフサイクルを持ちません。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub correlation_id: CorrelationId,
    pub body: String,
}

impl Task {
    pub fn new(correlation_id: CorrelationId, body: impl Into<String>) -> Self {
        Self {
            correlation_id,
            body: body.into(),
        }
    }

    /// 受信したメッセージから Task を復元する
    ///
    /// body は解釈しない生バイト列なので、UTF-8 でない部分は置換文字になります
    /// （評価エンジン側で compile エラーとして扱われる）。
    pub fn from_delivery(message_id: Option<&str>, body: &[u8]) -> Self {
        let correlation_id = message_id.map(CorrelationId::new).unwrap_or_else(CorrelationId::empty);
        Self {
            correlation_id,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// 前後の空白（改行を含む）を除いた式
    pub fn expression(&self) -> &str {
        self.body.trim()
    }
}
