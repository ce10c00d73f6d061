//! Data-fetch boundary
//!
//! Metric history and context come from a collaborator outside the pipeline.
//! Retries, backoff and timeouts live here and nowhere else: the pipeline only
//! ever sees a resolved [`Snapshot`] or a [`FetchFailure`].

use crate::config::RetryPolicy;
use crate::error::FetchError;
use crate::schema::Snapshot;
use crate::types::PipelineMarker;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Anything that can produce a snapshot for a user
pub trait SnapshotSource {
    fn fetch(&self, user_id: &str, as_of: DateTime<Utc>) -> Result<Snapshot, FetchError>;
}

impl<F> SnapshotSource for F
where
    F: Fn(&str, DateTime<Utc>) -> Result<Snapshot, FetchError>,
{
    fn fetch(&self, user_id: &str, as_of: DateTime<Utc>) -> Result<Snapshot, FetchError> {
        self(user_id, as_of)
    }
}

/// Final state of a fetch after all retries
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Resolved(Snapshot),
    Failed(FetchFailure),
}

/// A fetch that never produced a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub user_id: String,
    pub requested_at: DateTime<Utc>,
    pub error: FetchError,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl FetchFailure {
    /// Marker the orchestrator records for this failure
    pub fn marker(&self) -> PipelineMarker {
        match &self.error {
            FetchError::Timeout { .. } => PipelineMarker::DataFetchTimeout {
                attempts: self.attempts,
                elapsed_ms: self.elapsed_ms,
            },
            other => PipelineMarker::DataFetchFailed {
                attempts: self.attempts,
                reason: other.to_string(),
            },
        }
    }
}

/// How the retry loop waits between attempts
pub trait Backoff {
    fn wait(&self, delay: Duration);
}

/// Blocks the current thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Backoff for ThreadSleep {
    fn wait(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Wraps a source with bounded retries, exponential backoff and a
/// per-attempt timeout.
///
/// A blocking source cannot be interrupted, so an attempt that returns after
/// the timeout is discarded and counted as a timeout.
pub struct RetryingSource<S, B = ThreadSleep> {
    inner: S,
    policy: RetryPolicy,
    backoff: B,
}

impl<S: SnapshotSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            backoff: ThreadSleep,
        }
    }
}

impl<S: SnapshotSource, B: Backoff> RetryingSource<S, B> {
    pub fn with_backoff(inner: S, policy: RetryPolicy, backoff: B) -> Self {
        Self {
            inner,
            policy,
            backoff,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch with retries. Never returns an error: a final failure is a value.
    pub fn fetch_with_retry(&self, user_id: &str, as_of: DateTime<Utc>) -> FetchOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut elapsed_ms: u64 = 0;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.inner.fetch(user_id, as_of);
            let took_ms = started.elapsed().as_millis() as u64;
            elapsed_ms = elapsed_ms.saturating_add(took_ms);

            let error = match result {
                Ok(snapshot) if took_ms <= self.policy.timeout_ms => {
                    debug!(user_id, attempt, took_ms, "snapshot fetched");
                    return FetchOutcome::Resolved(snapshot);
                }
                Ok(_) => FetchError::Timeout {
                    elapsed_ms: took_ms,
                    limit_ms: self.policy.timeout_ms,
                },
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                warn!(user_id, attempt, error = %error, "snapshot fetch failed");
                return FetchOutcome::Failed(FetchFailure {
                    user_id: user_id.to_string(),
                    requested_at: as_of,
                    error,
                    attempts: attempt,
                    elapsed_ms,
                });
            }

            let delay_ms = self.policy.backoff_ms(attempt);
            warn!(user_id, attempt, delay_ms, error = %error, "retrying snapshot fetch");
            self.backoff.wait(Duration::from_millis(delay_ms));
            elapsed_ms = elapsed_ms.saturating_add(delay_ms);
        }
    }
}

impl<S: SnapshotSource, B: Backoff> SnapshotSource for RetryingSource<S, B> {
    fn fetch(&self, user_id: &str, as_of: DateTime<Utc>) -> Result<Snapshot, FetchError> {
        match self.fetch_with_retry(user_id, as_of) {
            FetchOutcome::Resolved(snapshot) => Ok(snapshot),
            FetchOutcome::Failed(failure) => Err(failure.error),
        }
    }
}

/// Reads `<dir>/<user_id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SnapshotSource for JsonFileSource {
    fn fetch(&self, user_id: &str, _as_of: DateTime<Utc>) -> Result<Snapshot, FetchError> {
        let path = self.dir.join(format!("{}.json", user_id));
        let json = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(user_id.to_string()),
            _ => FetchError::Unavailable(format!("{}: {}", path.display(), e)),
        })?;
        serde_json::from_str(&json).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

/// In-memory snapshots keyed by user id
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    snapshots: BTreeMap<String, Snapshot>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snapshot: Snapshot) {
        self.snapshots.insert(snapshot.user_id.clone(), snapshot);
    }
}

impl SnapshotSource for StaticSource {
    fn fetch(&self, user_id: &str, _as_of: DateTime<Utc>) -> Result<Snapshot, FetchError> {
        self.snapshots
            .get(user_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContextFactor;
    use chrono::TimeZone;
    use std::cell::{Cell, RefCell};

    /// Records delays instead of sleeping
    #[derive(Default)]
    struct RecordingBackoff {
        delays: RefCell<Vec<u64>>,
    }

    impl Backoff for &RecordingBackoff {
        fn wait(&self, delay: Duration) {
            self.delays.borrow_mut().push(delay.as_millis() as u64);
        }
    }

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
    }

    fn snapshot(user_id: &str) -> Snapshot {
        Snapshot::new(user_id, as_of(), Vec::new(), ContextFactor::default())
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let source = |user_id: &str, _: DateTime<Utc>| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(FetchError::Unavailable("connection reset".to_string()))
            } else {
                Ok(snapshot(user_id))
            }
        };
        let backoff = RecordingBackoff::default();
        let retrying = RetryingSource::with_backoff(source, RetryPolicy::default(), &backoff);

        let outcome = retrying.fetch_with_retry("user-1", as_of());

        assert_eq!(outcome, FetchOutcome::Resolved(snapshot("user-1")));
        assert_eq!(calls.get(), 3);
        assert_eq!(*backoff.delays.borrow(), vec![200, 400]);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let source = |_: &str, _: DateTime<Utc>| -> Result<Snapshot, FetchError> {
            Err(FetchError::Timeout {
                elapsed_ms: 5_000,
                limit_ms: 5_000,
            })
        };
        let backoff = RecordingBackoff::default();
        let retrying = RetryingSource::with_backoff(source, RetryPolicy::default(), &backoff);

        match retrying.fetch_with_retry("user-1", as_of()) {
            FetchOutcome::Failed(failure) => {
                assert_eq!(failure.attempts, 3);
                assert_eq!(failure.requested_at, as_of());
                assert!(matches!(
                    failure.marker(),
                    PipelineMarker::DataFetchTimeout { attempts: 3, .. }
                ));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(backoff.delays.borrow().len(), 2);
    }

    #[test]
    fn test_non_retryable_error_fails_fast() {
        let calls = Cell::new(0);
        let source = |user_id: &str, _: DateTime<Utc>| -> Result<Snapshot, FetchError> {
            calls.set(calls.get() + 1);
            Err(FetchError::NotFound(user_id.to_string()))
        };
        let backoff = RecordingBackoff::default();
        let retrying = RetryingSource::with_backoff(source, RetryPolicy::default(), &backoff);

        let outcome = retrying.fetch_with_retry("ghost", as_of());

        assert_eq!(calls.get(), 1);
        match outcome {
            FetchOutcome::Failed(failure) => assert_eq!(
                failure.marker(),
                PipelineMarker::DataFetchFailed {
                    attempts: 1,
                    reason: "No data for user ghost".to_string()
                }
            ),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_static_source() {
        let mut source = StaticSource::new();
        source.insert(snapshot("user-1"));
        assert!(source.fetch("user-1", as_of()).is_ok());
        assert_eq!(
            source.fetch("user-2", as_of()),
            Err(FetchError::NotFound("user-2".to_string()))
        );
    }

    #[test]
    fn test_json_file_source_missing_file() {
        let source = JsonFileSource::new(std::env::temp_dir().join("mediguard-missing-dir"));
        assert_eq!(
            source.fetch("nobody", as_of()),
            Err(FetchError::NotFound("nobody".to_string()))
        );
    }
}
