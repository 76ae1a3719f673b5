//! IdGenerator port - correlation id の生成
//!
//! 中央の採番器は持たず、ULID（時刻 + 80bit 乱数）で一意性を確保します。
//! テスト容易性のために trait として抽象化しています。

use crate::domain::CorrelationId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は Task ごとに新しい correlation id を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（publisher を複数タスクから共有するため）
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> CorrelationId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock から timestamp を取るので、FixedClock を使えば timestamp 部分を固定できます。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn new_id(&self) -> CorrelationId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        CorrelationId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    #[test]
    fn hundred_thousand_ids_are_distinct() {
        let id_gen = UlidGenerator::new(SystemClock);
        let ids: HashSet<CorrelationId> = (0..100_000).map(|_| id_gen.new_id()).collect();
        assert_eq!(ids.len(), 100_000);
    }

    #[test]
    fn fixed_clock_still_yields_distinct_ids() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.new_id();
        let id2 = id_gen.new_id();
        assert_ne!(id1, id2);

        // timestamp 部分は同じ
        let ts1 = Ulid::from_string(id1.as_str()).unwrap().timestamp_ms();
        let ts2 = Ulid::from_string(id2.as_str()).unwrap().timestamp_ms();
        assert_eq!(ts1, ts2);
        assert_eq!(ts1, fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn ids_are_time_ordered() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let clock = std::sync::Arc::new(clock);
        let id_gen = UlidGenerator::new(clock.clone());

        let earlier = id_gen.new_id();
        clock.advance(chrono::Duration::milliseconds(5));
        let later = id_gen.new_id();
        assert!(earlier.as_str() < later.as_str());
    }
}
