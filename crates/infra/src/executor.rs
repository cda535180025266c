//! Executor registry: routes a job's kind to a pluggable handler.
//!
//! Every execution runs inside a failure boundary. A handler that panics, or that
//! exceeds the optional execution timeout, produces an [`ExecutionOutcome::Failed`]
//! value instead of unwinding into the worker loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use taskq_core::JobKind;

/// Result returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Work done.
    Success,
    /// Work failed; the message becomes the job's `last_error`.
    Failure(String),
}

impl JobResult {
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }
}

impl From<Result<(), String>> for JobResult {
    fn from(value: Result<(), String>) -> Self {
        match value {
            Ok(()) => JobResult::Success,
            Err(e) => JobResult::Failure(e),
        }
    }
}

/// Work performed for one job kind.
///
/// Plain closures `Fn(&JsonValue) -> JobResult` implement this trait, which is
/// handy for tests and simple kinds.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &JsonValue) -> JobResult;
}

#[async_trait]
impl<F> JobHandler for F
where
    F: Fn(&JsonValue) -> JobResult + Send + Sync,
{
    async fn handle(&self, payload: &JsonValue) -> JobResult {
        self(payload)
    }
}

/// Why an execution did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The handler returned [`JobResult::Failure`].
    Handler,
    /// The handler panicked.
    Panicked,
    /// The handler did not finish within the configured timeout.
    TimedOut,
    /// No handler is registered for the kind (configuration error).
    UnknownKind,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed { cause: FailureCause, error: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Succeeded => None,
            ExecutionOutcome::Failed { error, .. } => Some(error),
        }
    }
}

/// Fixed `last_error` text for a job whose kind has no handler.
pub fn unknown_kind_message(kind: &JobKind) -> String {
    format!("unknown job kind: {kind}")
}

/// Maps job kinds to handlers.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(JobKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &kinds)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail executions that run longer than `timeout`. Off by default.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register<H>(&mut self, kind: JobKind, handler: H)
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Builder-style [`ExecutorRegistry::register`].
    pub fn with_handler<H>(mut self, kind: JobKind, handler: H) -> Self
    where
        H: JobHandler + 'static,
    {
        self.register(kind, handler);
        self
    }

    pub fn contains(&self, kind: &JobKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<_> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Run the handler for `kind` against `payload`.
    ///
    /// Never panics and never returns early with an error: every path yields an
    /// [`ExecutionOutcome`].
    pub async fn execute(&self, kind: &JobKind, payload: &JsonValue) -> ExecutionOutcome {
        let Some(handler) = self.handlers.get(kind).cloned() else {
            return ExecutionOutcome::Failed {
                cause: FailureCause::UnknownKind,
                error: unknown_kind_message(kind),
            };
        };

        let payload = payload.clone();
        let task = tokio::spawn(async move { handler.handle(&payload).await });
        let abort = task.abort_handle();

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return ExecutionOutcome::Failed {
                        cause: FailureCause::TimedOut,
                        error: format!("execution timed out after {}ms", limit.as_millis()),
                    };
                }
            },
            None => task.await,
        };

        match joined {
            Ok(JobResult::Success) => ExecutionOutcome::Succeeded,
            Ok(JobResult::Failure(error)) => ExecutionOutcome::Failed {
                cause: FailureCause::Handler,
                error,
            },
            Err(join_err) => ExecutionOutcome::Failed {
                cause: FailureCause::Panicked,
                error: format!("handler panicked: {}", panic_message(join_err)),
            },
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(s: &str) -> JobKind {
        JobKind::new(s).unwrap()
    }

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        async fn handle(&self, payload: &JsonValue) -> JobResult {
            if payload.get("ok").and_then(JsonValue::as_bool).unwrap_or(false) {
                JobResult::Success
            } else {
                JobResult::failure("payload not ok")
            }
        }
    }

    #[tokio::test]
    async fn routes_by_kind() {
        let registry = ExecutorRegistry::new()
            .with_handler(kind("echo"), Echo)
            .with_handler(kind("always"), |_: &JsonValue| JobResult::Success);

        let ok = registry.execute(&kind("echo"), &serde_json::json!({"ok": true})).await;
        assert_eq!(ok, ExecutionOutcome::Succeeded);

        let failed = registry.execute(&kind("echo"), &serde_json::json!({})).await;
        assert_eq!(
            failed,
            ExecutionOutcome::Failed {
                cause: FailureCause::Handler,
                error: "payload not ok".to_string(),
            }
        );

        assert!(registry.execute(&kind("always"), &JsonValue::Null).await.is_success());
    }

    #[tokio::test]
    async fn unknown_kind_is_reported_distinctly() {
        let registry = ExecutorRegistry::new();
        let outcome = registry.execute(&kind("zzz"), &JsonValue::Null).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Failed {
                cause: FailureCause::UnknownKind,
                error: "unknown job kind: zzz".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let registry = ExecutorRegistry::new().with_handler(kind("boom"), |_: &JsonValue| -> JobResult {
            panic!("kaboom")
        });

        let outcome = registry.execute(&kind("boom"), &JsonValue::Null).await;
        match outcome {
            ExecutionOutcome::Failed { cause, error } => {
                assert_eq!(cause, FailureCause::Panicked);
                assert!(error.contains("kaboom"), "{error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    struct Slow;

    #[async_trait]
    impl JobHandler for Slow {
        async fn handle(&self, _payload: &JsonValue) -> JobResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            JobResult::Success
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_opt_in() {
        let registry = ExecutorRegistry::new()
            .with_handler(kind("slow"), Slow)
            .with_timeout(Some(Duration::from_secs(5)));

        let outcome = registry.execute(&kind("slow"), &JsonValue::Null).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed { cause: FailureCause::TimedOut, .. }
        ));

        let patient = ExecutorRegistry::new().with_handler(kind("slow"), Slow);
        assert!(patient.execute(&kind("slow"), &JsonValue::Null).await.is_success());
    }

    #[test]
    fn kinds_are_sorted() {
        let registry = ExecutorRegistry::new()
            .with_handler(kind("b"), |_: &JsonValue| JobResult::Success)
            .with_handler(kind("a"), |_: &JsonValue| JobResult::Success);
        assert_eq!(registry.kinds(), vec![kind("a"), kind("b")]);
        assert!(registry.contains(&kind("a")));
        assert!(!registry.contains(&kind("c")));
    }
}
