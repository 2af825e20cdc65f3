//! Generation Retry Engine
//!
//! The generate → validate → execute state machine with a bounded retry
//! budget. Each failed attempt is recorded with its code and error text
//! and fed back into the next generation request so the generator can
//! correct itself. The machine terminates in exactly one of three
//! outcomes: succeeded, failed, or cancelled.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use datapilot_core::events::ToolEvent;
use datapilot_core::table::TablePayload;

use crate::contracts::{
    ClientHandles, CodeExecutor, CodeGenerator, CodeValidator, EngineContext, GenerationRequest,
    InputFile,
};
use crate::normalize::{normalize_rows, NormalizeOptions};

/// Default retry budget when the caller does not set one.
pub const DEFAULT_MAX_RETRIES: usize = 3;

// ============================================================================
// Attempt history and outcomes
// ============================================================================

/// One failed attempt: the code that was produced and why it failed.
///
/// A generator failure records empty code. Validator rejections and
/// executor failures record the code that was judged or run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationAttempt {
    pub code: String,
    pub error: String,
}

impl GenerationAttempt {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            error: error.into(),
        }
    }
}

/// Terminal outcome of one engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineOutcome {
    /// An attempt survived all phases. `attempts` holds the failures
    /// that preceded the winning attempt.
    Succeeded {
        code: String,
        table: TablePayload,
        log: String,
        attempts: Vec<GenerationAttempt>,
    },
    /// The retry budget was exhausted without a surviving attempt.
    Failed { attempts: Vec<GenerationAttempt> },
    /// Cancellation was observed before any attempt succeeded.
    Cancelled,
}

/// Phase labels reported on progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Generating,
    Validating,
    Executing,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EnginePhase::Generating => "generating",
            EnginePhase::Validating => "validating",
            EnginePhase::Executing => "executing",
        };
        f.write_str(label)
    }
}

// ============================================================================
// RetryEngine
// ============================================================================

/// The retry state machine. Collaborators are injected; the validator is
/// optional and its phase is skipped entirely when absent.
pub struct RetryEngine {
    generator: Arc<dyn CodeGenerator>,
    validator: Option<Arc<dyn CodeValidator>>,
    executor: Arc<dyn CodeExecutor>,
    max_retries: usize,
    normalize: NormalizeOptions,
    cancellation: CancellationToken,
    events: Option<mpsc::Sender<ToolEvent>>,
}

struct RunParams {
    data_model: Value,
    prompt: String,
    schema_excerpt: Option<String>,
    clients: ClientHandles,
    input_files: Vec<InputFile>,
    max_retries: usize,
    context: Option<EngineContext>,
}

impl RetryEngine {
    pub fn new(generator: Arc<dyn CodeGenerator>, executor: Arc<dyn CodeExecutor>) -> Self {
        Self {
            generator,
            validator: None,
            executor,
            max_retries: DEFAULT_MAX_RETRIES,
            normalize: NormalizeOptions::default(),
            cancellation: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn CodeValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_normalize_options(mut self, options: NormalizeOptions) -> Self {
        self.normalize = options;
        self
    }

    /// Attach a progress sink. The engine emits `ToolEvent::Progress` at
    /// each phase boundary; start and end framing stay with the caller.
    pub fn with_events(mut self, events: mpsc::Sender<ToolEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run with a flat parameter list and the engine's own retry budget.
    pub async fn run_flat(
        &self,
        data_model: Value,
        prompt: impl Into<String>,
        schema_excerpt: Option<String>,
        clients: ClientHandles,
        input_files: Vec<InputFile>,
    ) -> EngineOutcome {
        self.run(RunParams {
            data_model,
            prompt: prompt.into(),
            schema_excerpt,
            clients,
            input_files,
            max_retries: self.max_retries,
            context: None,
        })
        .await
    }

    /// Run from a typed context bundle. The context's retry budget wins
    /// over the engine default.
    pub async fn run_with_context(&self, context: &EngineContext) -> EngineOutcome {
        self.run(RunParams {
            data_model: context.data_model.clone(),
            prompt: context.prompt.clone(),
            schema_excerpt: context.schema_excerpt.clone(),
            clients: context.clients.clone(),
            input_files: context.input_files.clone(),
            max_retries: context.max_retries,
            context: Some(context.clone()),
        })
        .await
    }

    async fn run(&self, params: RunParams) -> EngineOutcome {
        let mut attempts: Vec<GenerationAttempt> = Vec::new();

        loop {
            if self.cancellation.is_cancelled() {
                debug!("retry engine cancelled");
                return EngineOutcome::Cancelled;
            }
            if attempts.len() >= params.max_retries {
                warn!(
                    attempts = attempts.len(),
                    "retry budget exhausted without a surviving attempt"
                );
                return EngineOutcome::Failed { attempts };
            }

            let retry_index = attempts.len();
            debug!(retry_index, "starting generation attempt");
            self.report_phase(EnginePhase::Generating, retry_index).await;

            let request = GenerationRequest {
                data_model: params.data_model.clone(),
                prompt: params.prompt.clone(),
                schema_excerpt: params.schema_excerpt.clone(),
                error_history: attempts.clone(),
                retry_index,
                cancellation: self.cancellation.clone(),
                context: params.context.clone(),
            };
            let code = match self.generator.generate(&request).await {
                Ok(code) => code,
                Err(e) => {
                    warn!(retry_index, error = %e, "generation failed");
                    attempts.push(GenerationAttempt::new("", e.to_string()));
                    continue;
                }
            };

            if self.cancellation.is_cancelled() {
                return EngineOutcome::Cancelled;
            }
            if let Some(validator) = &self.validator {
                self.report_phase(EnginePhase::Validating, retry_index).await;
                match validator.validate(&code, &params.data_model).await {
                    Ok(verdict) if verdict.valid => {}
                    Ok(verdict) => {
                        warn!(retry_index, reasoning = %verdict.reasoning, "validation rejected");
                        attempts.push(GenerationAttempt::new(
                            code,
                            format!("Validation rejected: {}", verdict.reasoning),
                        ));
                        continue;
                    }
                    Err(e) => {
                        warn!(retry_index, error = %e, "validation errored");
                        attempts.push(GenerationAttempt::new(code, e.to_string()));
                        continue;
                    }
                }
            }

            if self.cancellation.is_cancelled() {
                return EngineOutcome::Cancelled;
            }
            self.report_phase(EnginePhase::Executing, retry_index).await;
            match self
                .executor
                .execute(&code, &params.clients, &params.input_files)
                .await
            {
                Ok(output) => {
                    let table = normalize_rows(&output.rows, &self.normalize);
                    debug!(
                        retry_index,
                        rows = table.stats.row_count,
                        "execution succeeded"
                    );
                    return EngineOutcome::Succeeded {
                        code,
                        table,
                        log: output.log,
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(retry_index, error = %e, "execution failed");
                    attempts.push(GenerationAttempt::new(code, e.to_string()));
                }
            }
        }
    }

    async fn report_phase(&self, phase: EnginePhase, retry_index: usize) {
        if let Some(events) = &self.events {
            let _ = events
                .send(ToolEvent::Progress {
                    stage: phase.to_string(),
                    payload: Some(serde_json::json!({ "attempt": retry_index })),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use datapilot_core::table::ExecutionOutput;
    use datapilot_core::{CoreError, CoreResult};

    use crate::contracts::ValidationVerdict;

    /// Generator that fails a scripted number of times, then emits code.
    struct FlakyGenerator {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyGenerator {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CodeGenerator for FlakyGenerator {
        async fn generate(&self, request: &GenerationRequest) -> CoreResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.retry_index, call);
            assert_eq!(request.error_history.len(), call);
            if call < self.failures {
                Err(CoreError::generation(format!("model refused, call {}", call)))
            } else {
                Ok(format!("select * from t limit {}", call))
            }
        }
    }

    struct RejectAllValidator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CodeValidator for RejectAllValidator {
        async fn validate(&self, _code: &str, _model: &Value) -> CoreResult<ValidationVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ValidationVerdict::reject("column does not exist"))
        }
    }

    struct AcceptAllValidator {
        calls: AtomicUsize,
    }

    impl AcceptAllValidator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CodeValidator for AcceptAllValidator {
        async fn validate(&self, _code: &str, _model: &Value) -> CoreResult<ValidationVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ValidationVerdict::pass())
        }
    }

    /// Executor that fails a scripted number of times, then returns rows.
    struct FlakyExecutor {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyExecutor {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CodeExecutor for FlakyExecutor {
        async fn execute(
            &self,
            _code: &str,
            _clients: &ClientHandles,
            _files: &[InputFile],
        ) -> CoreResult<ExecutionOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(CoreError::execution(format!(
                    "Traceback: division by zero, call {}",
                    call
                )))
            } else {
                Ok(ExecutionOutput {
                    rows: vec![json!({"region": "emea", "total": 10})],
                    log: "ran fine".into(),
                })
            }
        }
    }

    fn engine(generator: Arc<dyn CodeGenerator>, executor: Arc<dyn CodeExecutor>) -> RetryEngine {
        RetryEngine::new(generator, executor)
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds_with_empty_history() {
        let outcome = engine(
            Arc::new(FlakyGenerator::new(0)),
            Arc::new(FlakyExecutor::new(0)),
        )
        .run_flat(json!({}), "totals", None, ClientHandles::new(), vec![])
        .await;

        match outcome {
            EngineOutcome::Succeeded { attempts, table, log, .. } => {
                assert!(attempts.is_empty());
                assert_eq!(table.stats.row_count, 1);
                assert_eq!(log, "ran fine");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds_records_two_attempts() {
        let generator = Arc::new(FlakyGenerator::new(2));
        let outcome = engine(generator.clone(), Arc::new(FlakyExecutor::new(0)))
            .run_flat(json!({}), "totals", None, ClientHandles::new(), vec![])
            .await;

        match outcome {
            EngineOutcome::Succeeded { attempts, .. } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts.iter().all(|a| a.code.is_empty()));
                assert!(attempts[0].error.contains("call 0"));
                assert!(attempts[1].error.contains("call 1"));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validator_rejections_exhaust_budget_without_executing() {
        let validator = Arc::new(RejectAllValidator {
            calls: AtomicUsize::new(0),
        });
        let executor = Arc::new(FlakyExecutor::new(0));
        let outcome = engine(Arc::new(FlakyGenerator::new(0)), executor.clone())
            .with_validator(validator.clone())
            .with_max_retries(3)
            .run_flat(json!({}), "totals", None, ClientHandles::new(), vec![])
            .await;

        match outcome {
            EngineOutcome::Failed { attempts } => {
                assert_eq!(attempts.len(), 3);
                for attempt in &attempts {
                    assert!(!attempt.code.is_empty());
                    assert!(attempt.error.starts_with("Validation rejected:"));
                }
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(validator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execution_failure_feeds_next_generation() {
        struct HistoryCheckingGenerator {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl CodeGenerator for HistoryCheckingGenerator {
            async fn generate(&self, request: &GenerationRequest) -> CoreResult<String> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call == 1 {
                    // The failed execution, with its code and trace, is visible here.
                    let prior = &request.error_history[0];
                    assert!(prior.code.contains("select"));
                    assert!(prior.error.contains("Traceback"));
                }
                Ok("select 1".into())
            }
        }

        let generator = Arc::new(HistoryCheckingGenerator {
            calls: AtomicUsize::new(0),
        });
        let validator = Arc::new(AcceptAllValidator::new());
        let executor = Arc::new(FlakyExecutor::new(1));
        let outcome = engine(generator.clone(), executor.clone())
            .with_validator(validator.clone())
            .run_flat(json!({}), "totals", None, ClientHandles::new(), vec![])
            .await;

        match outcome {
            EngineOutcome::Succeeded { attempts, .. } => assert_eq!(attempts.len(), 1),
            other => panic!("expected success, got {:?}", other),
        }
        // The retry after an execution failure regenerates and revalidates
        // the fresh code: one validate per generated attempt, never a
        // revalidation of code that already failed execution.
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_failed_with_full_history() {
        let outcome = engine(
            Arc::new(FlakyGenerator::new(usize::MAX)),
            Arc::new(FlakyExecutor::new(0)),
        )
        .with_max_retries(2)
        .run_flat(json!({}), "totals", None, ClientHandles::new(), vec![])
        .await;

        match outcome {
            EngineOutcome::Failed { attempts } => assert_eq!(attempts.len(), 2),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_budget_fails_without_calling_generator() {
        let generator = Arc::new(FlakyGenerator::new(0));
        let outcome = engine(generator.clone(), Arc::new(FlakyExecutor::new(0)))
            .with_max_retries(0)
            .run_flat(json!({}), "totals", None, ClientHandles::new(), vec![])
            .await;

        assert!(matches!(outcome, EngineOutcome::Failed { ref attempts } if attempts.is_empty()));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pre_cancelled_returns_cancelled_with_no_calls() {
        let token = CancellationToken::new();
        token.cancel();
        let generator = Arc::new(FlakyGenerator::new(0));
        let outcome = engine(generator.clone(), Arc::new(FlakyExecutor::new(0)))
            .with_cancellation(token)
            .run_flat(json!({}), "totals", None, ClientHandles::new(), vec![])
            .await;

        assert_eq!(outcome, EngineOutcome::Cancelled);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_retry_budget_overrides_engine_default() {
        let ctx = EngineContext::new(json!({}), "totals").with_max_retries(1);
        let outcome = engine(
            Arc::new(FlakyGenerator::new(usize::MAX)),
            Arc::new(FlakyExecutor::new(0)),
        )
        .with_max_retries(5)
        .run_with_context(&ctx)
        .await;

        assert!(matches!(outcome, EngineOutcome::Failed { ref attempts } if attempts.len() == 1));
    }

    #[tokio::test]
    async fn test_progress_events_follow_phase_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let outcome = engine(
            Arc::new(FlakyGenerator::new(0)),
            Arc::new(FlakyExecutor::new(0)),
        )
        .with_validator(Arc::new(AcceptAllValidator::new()))
        .with_events(tx)
        .run_flat(json!({}), "totals", None, ClientHandles::new(), vec![])
        .await;
        assert!(matches!(outcome, EngineOutcome::Succeeded { .. }));

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ToolEvent::Progress { stage, .. } = event {
                stages.push(stage);
            }
        }
        assert_eq!(stages, vec!["generating", "validating", "executing"]);
    }

    #[tokio::test]
    async fn test_outcome_serializes_with_status_tag() {
        let outcome = EngineOutcome::Failed {
            attempts: vec![GenerationAttempt::new("select 1", "boom")],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["attempts"][0]["error"], "boom");
    }
}
