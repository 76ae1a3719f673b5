//! Observability: tracing subscriber setup and worker counters.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::fmt::format::{DefaultFields, Format};

/// Snapshot of one worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub encode_fallbacks: u64,
    pub publish_failures: u64,
}

impl WorkerCounts {
    /// 複数ワーカーの合計
    pub fn merge(self, other: WorkerCounts) -> WorkerCounts {
        WorkerCounts {
            processed: self.processed + other.processed,
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
            encode_fallbacks: self.encode_fallbacks + other.encode_fallbacks,
            publish_failures: self.publish_failures + other.publish_failures,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingInitError {
    #[error("invalid log level '{level}': {message}")]
    InvalidLevel { level: String, message: String },

    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Build the filter: `RUST_LOG` wins, otherwise `level`.
///
/// `level` は常に検証する（RUST_LOG があっても設定ミスは起動時に落とす）
pub fn env_filter(level: &str) -> Result<EnvFilter, TracingInitError> {
    let parsed = level
        .parse::<LevelFilter>()
        .map_err(|e| TracingInitError::InvalidLevel {
            level: level.to_string(),
            message: e.to_string(),
        })?;

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::default().add_directive(parsed.into()))
}

/// ログの出力先。stdout は client のプロンプトと id の出力に使う
pub type LogWriter = fn() -> std::io::Stderr;

const LOG_WRITER: LogWriter = std::io::stderr;

fn subscriber(
    filter: EnvFilter,
) -> SubscriberBuilder<DefaultFields, Format, EnvFilter, LogWriter> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(LOG_WRITER)
        .with_target(false)
}

/// Install the global fmt subscriber on stderr. Call once, from the binary.
pub fn init_tracing(level: &str) -> Result<(), TracingInitError> {
    let filter = env_filter(level)?;
    subscriber(filter)
        .try_init()
        .map_err(|e| TracingInitError::AlreadyInstalled(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_merge_field_by_field() {
        let a = WorkerCounts {
            processed: 3,
            succeeded: 2,
            failed: 1,
            ..Default::default()
        };
        let b = WorkerCounts {
            processed: 1,
            publish_failures: 1,
            ..Default::default()
        };
        let total = a.merge(b);
        assert_eq!(total.processed, 4);
        assert_eq!(total.succeeded, 2);
        assert_eq!(total.failed, 1);
        assert_eq!(total.publish_failures, 1);
    }

    #[rstest::rstest]
    #[case("bogus")]
    #[case("inf")]
    #[case("debug,warn")]
    fn unparseable_level_is_rejected(#[case] level: &str) {
        let err = env_filter(level).unwrap_err();
        assert!(matches!(err, TracingInitError::InvalidLevel { .. }), "{err:?}");
    }

    #[rstest::rstest]
    #[case("info")]
    #[case("DEBUG")]
    #[case("off")]
    #[case("trace")]
    fn known_levels_build_a_filter(#[case] level: &str) {
        assert!(env_filter(level).is_ok());
    }

    #[test]
    fn subscriber_writes_to_stderr() {
        let builder = subscriber(EnvFilter::new("info"));
        let _: SubscriberBuilder<_, _, _, fn() -> std::io::Stderr> = builder;
    }

    #[test]
    fn counts_serialize_as_flat_object() {
        let v = serde_json::to_value(WorkerCounts::default()).unwrap();
        assert_eq!(v["processed"], 0);
        assert_eq!(v["encode_fallbacks"], 0);
    }
}
