//! Evaluator port - 式の評価エンジン
//!
//! 純粋関数 `string -> number | error` として扱います。

use crate::domain::EvalError;

pub trait Evaluator: Send + Sync {
    fn evaluate(&self, formula: &str) -> Result<f64, EvalError>;
}
