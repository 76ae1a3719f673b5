//! Outcome model: the tagged result of evaluating one Task.
//!
//! `Outcome` is the in-process shape (a real tagged union). `ResultRecord` is the
//! wire shape `{id, data, err, ok}` that is published as JSON.

use serde::{Deserialize, Serialize, Serializer};

use super::ids::CorrelationId;

/// Content type carried by result messages.
pub const RESULT_CONTENT_TYPE: &str = "application/json";

/// Success value or human-readable error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(f64),
    Error(String),
}

/// The outcome produced for one Task, carrying the Task's correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcResult {
    pub correlation_id: CorrelationId,
    pub outcome: Outcome,
}

impl CalcResult {
    pub fn success(correlation_id: CorrelationId, value: f64) -> Self {
        Self {
            correlation_id,
            outcome: Outcome::Value(value),
        }
    }

    pub fn failure(correlation_id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            outcome: Outcome::Error(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Value(_))
    }

    pub fn value(&self) -> Option<f64> {
        match self.outcome {
            Outcome::Value(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Value(_) => None,
            Outcome::Error(message) => Some(message),
        }
    }

    /// JSON payload for the result queue.
    ///
    /// Fails only for a non-finite value (JSON has no representation for it).
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&ResultRecord::from(self))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let record: ResultRecord = serde_json::from_slice(bytes)?;
        Ok(record.into())
    }

    /// Hand-built envelope used when `to_json` fails.
    ///
    /// Built from `serde_json::Value`, whose `Display` cannot fail.
    pub fn fallback_envelope(correlation_id: &CorrelationId, error: &str) -> Vec<u8> {
        serde_json::json!({
            "ok": false,
            "id": correlation_id.as_str(),
            "err": error,
        })
        .to_string()
        .into_bytes()
    }
}

/// Wire record. Exactly one of `data` / `err` is meaningful, selected by `ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    #[serde(default, serialize_with = "finite_f64")]
    pub data: f64,
    #[serde(default)]
    pub err: String,
    pub ok: bool,
}

fn finite_f64<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(serde::ser::Error::custom(format!(
            "json: unsupported value: {value}"
        )));
    }
    serializer.serialize_f64(*value)
}

impl From<&CalcResult> for ResultRecord {
    fn from(result: &CalcResult) -> Self {
        let id = result.correlation_id.as_str().to_string();
        match &result.outcome {
            Outcome::Value(v) => Self {
                id,
                data: *v,
                err: String::new(),
                ok: true,
            },
            Outcome::Error(message) => Self {
                id,
                data: 0.0,
                err: message.clone(),
                ok: false,
            },
        }
    }
}

impl From<ResultRecord> for CalcResult {
    fn from(record: ResultRecord) -> Self {
        let correlation_id = CorrelationId::new(record.id);
        if record.ok {
            CalcResult::success(correlation_id, record.data)
        } else {
            CalcResult::failure(correlation_id, record.err)
        }
    }
}
