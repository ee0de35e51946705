//! Tool executor
//!
//! Runs one invocation end to end: lookup, argument validation, policy
//! check, then the tool itself under a timeout raced against cancellation.
//! Every outcome is a [`ToolResult`] and every outcome is counted.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{schema, ToolFailureKind, ToolInvocation, ToolPolicy, ToolRegistry, ToolResult};
use crate::error::ToolError;

/// Latency samples kept per tool for the rolling average
pub const LATENCY_WINDOW: usize = 64;

/// Counters for one tool, or for all of them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    /// Mean over the last [`LATENCY_WINDOW`] invocations
    pub average_latency_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorMetrics {
    pub global: ToolMetrics,
    pub tools: BTreeMap<String, ToolMetrics>,
}

#[derive(Debug, Default)]
struct Counter {
    invocations: u64,
    successes: u64,
    failures: u64,
    samples: VecDeque<Duration>,
}

impl Counter {
    fn record(&mut self, success: bool, duration: Duration) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn snapshot(&self) -> ToolMetrics {
        let average_latency_ms = if self.samples.is_empty() {
            0.0
        } else {
            let total: Duration = self.samples.iter().sum();
            total.as_secs_f64() * 1000.0 / self.samples.len() as f64
        };
        ToolMetrics {
            invocations: self.invocations,
            successes: self.successes,
            failures: self.failures,
            average_latency_ms,
        }
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    global: Counter,
    tools: HashMap<String, Counter>,
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    policy: ToolPolicy,
    metrics: Mutex<MetricsState>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, policy: ToolPolicy) -> Self {
        Self {
            registry,
            policy,
            metrics: Mutex::new(MetricsState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Run one invocation. Failures are reported in the result, never as `Err`.
    pub async fn execute(&self, invocation: ToolInvocation, cancel: &CancellationToken) -> ToolResult {
        let started = Instant::now();
        let result = self.run(&invocation, cancel, started).await;
        self.record(&invocation.tool_name, &result);

        match &result.error {
            None => debug!(
                tool = %invocation.tool_name,
                requester = %invocation.requester,
                elapsed_ms = result.duration.as_millis() as u64,
                "Tool succeeded"
            ),
            Some(failure) => warn!(
                tool = %invocation.tool_name,
                requester = %invocation.requester,
                kind = ?failure.kind,
                elapsed_ms = result.duration.as_millis() as u64,
                error = %failure.message,
                "Tool failed"
            ),
        }
        result
    }

    async fn run(&self, invocation: &ToolInvocation, cancel: &CancellationToken, started: Instant) -> ToolResult {
        let Some(entry) = self.registry.get(&invocation.tool_name) else {
            return from_error(&ToolError::NotFound(invocation.tool_name.clone()), started);
        };

        if let Err(e) = schema::validate(&entry.tool.parameters_schema(), &invocation.arguments) {
            return from_error(&e, started);
        }

        if let Err(e) = self.policy.check(&invocation.tool_name) {
            return from_error(&e, started);
        }

        let timeout = invocation.timeout.unwrap_or(self.policy.default_timeout());
        let arguments = invocation.arguments.clone();

        // Dropping the tool future on either branch kills any process it owns
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ToolResult::failed(ToolFailureKind::Cancelled, "Invocation cancelled", started.elapsed());
            }
            outcome = tokio::time::timeout(timeout, entry.tool.execute(arguments)) => outcome,
        };

        match outcome {
            Err(_) => ToolResult::failed(
                ToolFailureKind::Timeout,
                format!("Timed out after {:?}", timeout),
                started.elapsed(),
            ),
            Ok(Err(e)) => from_error(&e, started),
            Ok(Ok(output)) if output.success => ToolResult {
                success: true,
                data: output.content,
                error: None,
                duration: started.elapsed(),
            },
            Ok(Ok(output)) => {
                let message = output.error.unwrap_or_else(|| "Tool reported failure".to_string());
                ToolResult {
                    data: output.content,
                    ..ToolResult::failed(ToolFailureKind::Execution, message, started.elapsed())
                }
            }
        }
    }

    /// Run invocations one after another, in order. Results line up with
    /// `invocations`; once `cancel` fires the rest come back cancelled.
    pub async fn execute_batch(
        &self,
        invocations: Vec<ToolInvocation>,
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            results.push(self.execute(invocation, cancel).await);
        }
        results
    }

    /// Unknown names only reach the global counter, so invented names
    /// cannot grow the per-tool map
    fn record(&self, tool: &str, result: &ToolResult) {
        let mut metrics = self.metrics.lock();
        metrics.global.record(result.success, result.duration);
        if result.failure_kind() == Some(ToolFailureKind::NotFound) {
            return;
        }
        metrics
            .tools
            .entry(tool.to_string())
            .or_default()
            .record(result.success, result.duration);
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        let metrics = self.metrics.lock();
        ExecutorMetrics {
            global: metrics.global.snapshot(),
            tools: metrics
                .tools
                .iter()
                .map(|(name, counter)| (name.clone(), counter.snapshot()))
                .collect(),
        }
    }

    pub fn tool_metrics(&self, tool: &str) -> Option<ToolMetrics> {
        self.metrics.lock().tools.get(tool).map(Counter::snapshot)
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock() = MetricsState::default();
    }
}

fn from_error(error: &ToolError, started: Instant) -> ToolResult {
    let kind = match error {
        ToolError::NotFound(_) => ToolFailureKind::NotFound,
        ToolError::Validation(_) => ToolFailureKind::Validation,
        ToolError::PermissionDenied(_) => ToolFailureKind::PermissionDenied,
        ToolError::NameConflict { .. } | ToolError::ExecutionFailed(_) | ToolError::Io(_) => {
            ToolFailureKind::Execution
        }
    };
    ToolResult::failed(kind, error.to_string(), started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{BoxFuture, Tool, ToolOutput, ToolSource};
    use serde_json::{json, Value};

    struct Echo;

    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text back"
        }

        fn parameters_schema(&self) -> Value {
            crate::tool_params!(text: "string" => "Text to echo")
        }

        fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
            Box::pin(async move {
                match params["text"].as_str() {
                    Some("fail") => Ok(ToolOutput::failure(json!({"echo": "fail"}), "asked to fail")),
                    Some("boom") => Err(ToolError::ExecutionFailed("boom".into())),
                    Some(text) => Ok(ToolOutput::success(text.to_string())),
                    None => unreachable!("validated"),
                }
            })
        }
    }

    struct Sleeper;

    impl Tool for Sleeper {
        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "Sleep for a long time"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn execute(&self, _params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ToolOutput::success("woke"))
            })
        }
    }

    fn executor(policy: ToolPolicy) -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(Echo), ToolSource::Builtin).unwrap();
        registry.register(Arc::new(Sleeper), ToolSource::Builtin).unwrap();
        ToolExecutor::new(registry, policy)
    }

    #[tokio::test]
    async fn test_success_and_failure_kinds() {
        let executor = executor(ToolPolicy::default());
        let cancel = CancellationToken::new();

        let ok = executor
            .execute(ToolInvocation::new("echo", json!({"text": "hi"})), &cancel)
            .await;
        assert!(ok.success);
        assert_eq!(ok.data, json!("hi"));

        let reported = executor
            .execute(ToolInvocation::new("echo", json!({"text": "fail"})), &cancel)
            .await;
        assert_eq!(reported.failure_kind(), Some(ToolFailureKind::Execution));
        assert_eq!(reported.data["echo"], "fail");

        let raised = executor
            .execute(ToolInvocation::new("echo", json!({"text": "boom"})), &cancel)
            .await;
        assert_eq!(raised.failure_kind(), Some(ToolFailureKind::Execution));

        let missing = executor.execute(ToolInvocation::new("nope", json!({})), &cancel).await;
        assert_eq!(missing.failure_kind(), Some(ToolFailureKind::NotFound));

        let invalid = executor.execute(ToolInvocation::new("echo", json!({"text": 1})), &cancel).await;
        assert_eq!(invalid.failure_kind(), Some(ToolFailureKind::Validation));
    }

    #[tokio::test]
    async fn test_policy_denial_is_counted() {
        let executor = executor(ToolPolicy::new(Vec::<String>::new(), ["echo"]).unwrap());
        let result = executor
            .execute(ToolInvocation::new("echo", json!({"text": "hi"})), &CancellationToken::new())
            .await;
        assert_eq!(result.failure_kind(), Some(ToolFailureKind::PermissionDenied));

        let metrics = executor.tool_metrics("echo").unwrap();
        assert_eq!(metrics.invocations, 1);
        assert_eq!(metrics.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_cancel() {
        let executor = executor(ToolPolicy::default());

        let result = executor
            .execute(
                ToolInvocation::new("sleep", json!({})).with_timeout(Duration::from_millis(50)),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.failure_kind(), Some(ToolFailureKind::Timeout));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor.execute(ToolInvocation::new("sleep", json!({})), &cancel).await;
        assert_eq!(result.failure_kind(), Some(ToolFailureKind::Cancelled));
    }

    #[tokio::test]
    async fn test_metrics_accumulate_and_reset() {
        let executor = executor(ToolPolicy::default());
        let cancel = CancellationToken::new();
        for text in ["a", "b", "fail"] {
            executor
                .execute(ToolInvocation::new("echo", json!({"text": text})), &cancel)
                .await;
        }

        let metrics = executor.metrics();
        assert_eq!(metrics.global.invocations, 3);
        assert_eq!(metrics.global.successes, 2);
        assert_eq!(metrics.global.failures, 1);
        assert_eq!(metrics.tools["echo"].invocations, 3);

        executor.reset_metrics();
        assert_eq!(executor.metrics().global, ToolMetrics::default());
        assert!(executor.tool_metrics("echo").is_none());
    }

    #[tokio::test]
    async fn test_unknown_tools_stay_out_of_per_tool_metrics() {
        let executor = executor(ToolPolicy::default());
        let cancel = CancellationToken::new();
        for i in 0..50 {
            executor
                .execute(ToolInvocation::new(format!("invented_{i}"), json!({})), &cancel)
                .await;
        }

        let metrics = executor.metrics();
        assert_eq!(metrics.global.invocations, 50);
        assert_eq!(metrics.global.failures, 50);
        assert!(metrics.tools.is_empty());
        assert!(executor.tool_metrics("invented_0").is_none());
    }

    #[tokio::test]
    async fn test_batch_keeps_order() {
        let executor = executor(ToolPolicy::default());
        let results = executor
            .execute_batch(
                vec![
                    ToolInvocation::new("echo", json!({"text": "one"})),
                    ToolInvocation::new("missing", json!({})),
                    ToolInvocation::new("echo", json!({"text": "three"})),
                ],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].data, json!("one"));
        assert_eq!(results[1].failure_kind(), Some(ToolFailureKind::NotFound));
        assert_eq!(results[2].data, json!("three"));
        assert_eq!(executor.metrics().global.invocations, 3);
    }

    #[tokio::test]
    async fn test_batch_after_cancel() {
        let executor = executor(ToolPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = executor
            .execute_batch(
                vec![
                    ToolInvocation::new("sleep", json!({})),
                    ToolInvocation::new("sleep", json!({})),
                ],
                &cancel,
            )
            .await;
        assert!(results
            .iter()
            .all(|r| r.failure_kind() == Some(ToolFailureKind::Cancelled)));
    }

    #[test]
    fn test_rolling_window_is_bounded() {
        let mut counter = Counter::default();
        for _ in 0..LATENCY_WINDOW {
            counter.record(true, Duration::from_millis(1000));
        }
        for _ in 0..LATENCY_WINDOW {
            counter.record(true, Duration::from_millis(10));
        }
        let snapshot = counter.snapshot();
        assert_eq!(snapshot.invocations, 2 * LATENCY_WINDOW as u64);
        assert!((snapshot.average_latency_ms - 10.0).abs() < 1e-6);
    }
}
