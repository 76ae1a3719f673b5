//! ResultTracker - 呼び出し側での突き合わせ
//!
//! ResultConsumer は届いたものを全部流すだけなので、
//! 「自分が投げた id の結果だけを見る」ための状態をここで持ちます。
//!
//! - 未知の id → `Matched::Unknown`（呼び出し側は捨てる）
//! - 2 回目以降 → `Matched::Duplicate`（エラーではない）
//! - 結果が来ないまま一定時間経った id → `expire()` で回収
//! - 回答済みの id も `expire()` で同じ期限を過ぎたら忘れる（以後の重複は `Unknown`）

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{CalcResult, CorrelationId};
use crate::ports::Clock;

/// How an arriving result relates to tracked submissions.
#[derive(Debug, Clone, PartialEq)]
pub enum Matched {
    /// First result for an outstanding submission.
    First { expression: String, elapsed: Duration },
    /// Another result for an id that was already answered.
    Duplicate { expression: String },
    /// Id was never submitted through this tracker (or has expired).
    Unknown,
}

#[derive(Debug, Clone)]
struct Pending {
    expression: String,
    submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Answered {
    expression: String,
    answered_at: DateTime<Utc>,
}

pub struct ResultTracker<C> {
    clock: C,
    pending: HashMap<CorrelationId, Pending>,
    answered: HashMap<CorrelationId, Answered>,
}

impl<C: Clock> ResultTracker<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            pending: HashMap::new(),
            answered: HashMap::new(),
        }
    }

    /// Remember a submission.
    pub fn track(&mut self, id: CorrelationId, expression: impl Into<String>) {
        self.pending.insert(
            id,
            Pending {
                expression: expression.into(),
                submitted_at: self.clock.now(),
            },
        );
    }

    pub fn observe(&mut self, result: &CalcResult) -> Matched {
        let id = &result.correlation_id;
        if let Some(pending) = self.pending.remove(id) {
            let now = self.clock.now();
            let elapsed = now - pending.submitted_at;
            self.answered.insert(
                id.clone(),
                Answered {
                    expression: pending.expression.clone(),
                    answered_at: now,
                },
            );
            return Matched::First {
                expression: pending.expression,
                elapsed,
            };
        }
        match self.answered.get(id) {
            Some(answered) => Matched::Duplicate {
                expression: answered.expression.clone(),
            },
            None => Matched::Unknown,
        }
    }

    /// Stop tracking a submission that was never published.
    pub fn forget(&mut self, id: &CorrelationId) {
        self.pending.remove(id);
    }

    /// Number of submissions still waiting for a result.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn is_outstanding(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of answered ids still remembered for duplicate detection.
    pub fn remembered(&self) -> usize {
        self.answered.len()
    }

    /// Drop and return submissions older than `older_than` with no result yet.
    ///
    /// 回答済みで `older_than` より古いものも捨てる（戻り値には含めない）。
    /// どちらも、その後に届いた結果は `Unknown` になる
    pub fn expire(&mut self, older_than: Duration) -> Vec<(CorrelationId, String)> {
        let now = self.clock.now();
        self.answered.retain(|_, a| now - a.answered_at <= older_than);

        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, p)| now - p.submitted_at > older_than)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|p| (id, p.expression)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn first_result_matches_and_reports_elapsed() {
        let clock = clock();
        let mut tracker = ResultTracker::new(clock.clone());
        let id = CorrelationId::new("a");
        tracker.track(id.clone(), "1 + 1");

        clock.advance(Duration::milliseconds(250));
        let matched = tracker.observe(&CalcResult::success(id, 2.0));

        assert_eq!(
            matched,
            Matched::First {
                expression: "1 + 1".to_string(),
                elapsed: Duration::milliseconds(250)
            }
        );
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn second_result_is_a_duplicate_not_an_error() {
        let mut tracker = ResultTracker::new(clock());
        let id = CorrelationId::new("a");
        tracker.track(id.clone(), "1 + 1");

        let result = CalcResult::success(id, 2.0);
        assert!(matches!(tracker.observe(&result), Matched::First { .. }));
        assert_eq!(
            tracker.observe(&result),
            Matched::Duplicate {
                expression: "1 + 1".to_string()
            }
        );
    }

    #[test]
    fn unknown_ids_are_not_matched() {
        let mut tracker = ResultTracker::new(clock());
        tracker.track(CorrelationId::new("mine"), "1");

        let foreign = CalcResult::success(CorrelationId::new("theirs"), 1.0);
        assert_eq!(tracker.observe(&foreign), Matched::Unknown);
        assert_eq!(tracker.outstanding(), 1);
    }

    #[test]
    fn forgotten_submission_no_longer_matches() {
        let mut tracker = ResultTracker::new(clock());
        let id = CorrelationId::new("a");
        tracker.track(id.clone(), "1");
        tracker.forget(&id);

        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(tracker.observe(&CalcResult::success(id, 1.0)), Matched::Unknown);
    }

    #[test]
    fn answered_ids_are_forgotten_after_the_timeout() {
        let clock = clock();
        let mut tracker = ResultTracker::new(clock.clone());
        let id = CorrelationId::new("a");
        tracker.track(id.clone(), "1 + 1");
        let result = CalcResult::success(id, 2.0);
        assert!(matches!(tracker.observe(&result), Matched::First { .. }));

        clock.advance(Duration::seconds(3));
        assert!(tracker.expire(Duration::seconds(5)).is_empty());
        assert_eq!(tracker.remembered(), 1);
        assert!(matches!(tracker.observe(&result), Matched::Duplicate { .. }));

        clock.advance(Duration::seconds(3));
        assert!(tracker.expire(Duration::seconds(5)).is_empty());
        assert_eq!(tracker.remembered(), 0);
        assert_eq!(tracker.observe(&result), Matched::Unknown);
    }

    #[test]
    fn expire_collects_only_old_submissions() {
        let clock = clock();
        let mut tracker = ResultTracker::new(clock.clone());
        tracker.track(CorrelationId::new("old"), "1");
        clock.advance(Duration::seconds(10));
        tracker.track(CorrelationId::new("new"), "2");
        clock.advance(Duration::seconds(1));

        let expired = tracker.expire(Duration::seconds(5));
        assert_eq!(expired, vec![(CorrelationId::new("old"), "1".to_string())]);
        assert!(tracker.is_outstanding(&CorrelationId::new("new")));

        let late = CalcResult::success(CorrelationId::new("old"), 1.0);
        assert_eq!(tracker.observe(&late), Matched::Unknown);
    }
}
