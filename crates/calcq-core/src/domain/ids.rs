//! Correlation identifiers.
//!
//! # 不透明性
//! `CorrelationId` は Task と Result を結びつけるトークンです。
//! 生成側（IdGenerator）は ULID を使いますが、受信側は構造を解釈せず
//! 等値比較だけを行います。そのため内部表現は `String` のままにしています。
//!
//! - 他の publisher が付けた任意の message_id もそのまま受け入れられる
//! - ULID 以外の形式に切り替えても受信側は影響を受けない

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Opaque token linking a Task to its eventual Result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// broker のメタデータなど、外部から受け取った文字列をそのまま包む
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// message_id を持たない Task に対応する空の id
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<Ulid> for CorrelationId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulid_backed_ids_display_as_ulid_text() {
        let ulid = Ulid::new();
        let id = CorrelationId::from(ulid);
        assert_eq!(id.to_string(), ulid.to_string());
        assert_eq!(id.as_str().len(), 26);
    }

    #[test]
    fn ids_compare_by_value_only() {
        let a = CorrelationId::new("01HX-not-a-ulid");
        let b = CorrelationId::from("01HX-not-a-ulid");
        assert_eq!(a, b);
        assert_ne!(a, CorrelationId::empty());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = CorrelationId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: CorrelationId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}
