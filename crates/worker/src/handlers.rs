//! Simulated handlers for `send_email`, `process_data` and `generate_report`.
//!
//! Each one sleeps for a random time in its range and fails at a fixed rate, which
//! is enough to exercise priorities, retries and the permanent-failure log.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value as JsonValue;
use tracing::info;

use taskq_core::{DomainResult, JobKind};
use taskq_infra::executor::{ExecutorRegistry, JobHandler, JobResult};

/// Sleeps, then succeeds or fails at random.
#[derive(Debug, Clone)]
pub struct SimulatedHandler {
    name: &'static str,
    min: Duration,
    max: Duration,
    failure_rate: f64,
    failure_message: &'static str,
}

impl SimulatedHandler {
    pub fn send_email() -> Self {
        Self {
            name: "send_email",
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
            failure_rate: 0.2,
            failure_message: "SMTP server temporarily unavailable",
        }
    }

    pub fn process_data() -> Self {
        Self {
            name: "process_data",
            min: Duration::from_secs(2),
            max: Duration::from_secs(4),
            failure_rate: 0.15,
            failure_message: "Data processing error",
        }
    }

    pub fn generate_report() -> Self {
        Self {
            name: "generate_report",
            min: Duration::from_secs(3),
            max: Duration::from_secs(5),
            failure_rate: 0.1,
            failure_message: "Report generation timeout",
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn with_duration(mut self, min: Duration, max: Duration) -> Self {
        self.min = min;
        self.max = max.max(min);
        self
    }

    /// Clamped to `0.0..=1.0`.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn describe(&self, payload: &JsonValue) {
        let field = |key: &str| payload.get(key).and_then(JsonValue::as_str).unwrap_or("unknown");
        match self.name {
            "send_email" => info!(to = field("to"), subject = field("subject"), "sending email"),
            "process_data" => info!(data_type = field("data_type"), "processing data"),
            "generate_report" => info!(report_type = field("report_type"), "generating report"),
            other => info!(handler = other, "running simulated job"),
        }
    }
}

#[async_trait]
impl JobHandler for SimulatedHandler {
    async fn handle(&self, payload: &JsonValue) -> JobResult {
        self.describe(payload);

        let (delay, fails) = {
            let mut rng = rand::rng();
            let ms = rng.random_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
            (Duration::from_millis(ms), rng.random_bool(self.failure_rate))
        };
        tokio::time::sleep(delay).await;

        if fails {
            JobResult::failure(self.failure_message)
        } else {
            JobResult::Success
        }
    }
}

/// Registry with the three simulated kinds.
pub fn demo_registry() -> DomainResult<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    for handler in [
        SimulatedHandler::send_email(),
        SimulatedHandler::process_data(),
        SimulatedHandler::generate_report(),
    ] {
        registry.register(JobKind::new(handler.name())?, handler);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskq_infra::executor::ExecutionOutcome;

    #[test]
    fn registry_covers_builtin_kinds() {
        let kinds: Vec<_> = demo_registry()
            .unwrap()
            .kinds()
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(kinds, vec!["generate_report", "process_data", "send_email"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_within_range_then_succeeds() {
        let handler = SimulatedHandler::send_email().with_failure_rate(0.0);
        let started = tokio::time::Instant::now();
        let result = handler.handle(&serde_json::json!({"to": "a@example.com"})).await;
        let waited = started.elapsed();

        assert_eq!(result, JobResult::Success);
        assert!(waited >= Duration::from_secs(1) && waited <= Duration::from_secs(4), "{waited:?}");
    }

    #[tokio::test]
    async fn always_failing_handler_reports_its_message() {
        let handler = SimulatedHandler::generate_report()
            .with_duration(Duration::ZERO, Duration::ZERO)
            .with_failure_rate(1.0);
        let registry = ExecutorRegistry::new().with_handler(JobKind::new("generate_report").unwrap(), handler);

        let outcome = registry
            .execute(&JobKind::new("generate_report").unwrap(), &JsonValue::Null)
            .await;
        assert_eq!(outcome.error(), Some("Report generation timeout"));
        assert!(!matches!(outcome, ExecutionOutcome::Succeeded));
    }
}
