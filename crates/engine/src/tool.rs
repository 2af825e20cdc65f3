//! Data Query Tool
//!
//! Wraps the retry engine in the unified tool contract so the planner can
//! dispatch it by action name. Expected failures (bad arguments, exhausted
//! retries) surface inside the `End` event; the run itself never errors
//! for those.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use datapilot_core::events::ToolEvent;
use datapilot_core::tool::{Tool, ToolContext, ToolOutput};
use datapilot_core::table::TablePayload;
use datapilot_core::CoreResult;

use crate::contracts::{
    ClientHandles, CodeExecutor, CodeGenerator, CodeValidator, EngineContext, InputFile,
};
use crate::normalize::NormalizeOptions;
use crate::retry::{EngineOutcome, RetryEngine, DEFAULT_MAX_RETRIES};

pub const DATA_QUERY_TOOL_NAME: &str = "generate_data";

/// Arguments accepted from the planner's `action.arguments`.
#[derive(Debug, Deserialize)]
struct DataQueryArgs {
    #[serde(default)]
    data_model: Value,
    prompt: String,
    #[serde(default)]
    schema_excerpt: Option<String>,
    #[serde(default)]
    max_retries: Option<usize>,
}

/// The code generation/execution retry engine, exposed as a tool.
pub struct DataQueryTool {
    generator: Arc<dyn CodeGenerator>,
    validator: Option<Arc<dyn CodeValidator>>,
    executor: Arc<dyn CodeExecutor>,
    clients: ClientHandles,
    input_files: Vec<InputFile>,
    max_retries: usize,
    normalize: NormalizeOptions,
}

impl DataQueryTool {
    pub fn new(generator: Arc<dyn CodeGenerator>, executor: Arc<dyn CodeExecutor>) -> Self {
        Self {
            generator,
            validator: None,
            executor,
            clients: ClientHandles::new(),
            input_files: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            normalize: NormalizeOptions::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn CodeValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_clients(mut self, clients: ClientHandles) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_input_files(mut self, files: Vec<InputFile>) -> Self {
        self.input_files = files;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_normalize_options(mut self, options: NormalizeOptions) -> Self {
        self.normalize = options;
        self
    }

    fn build_context(&self, args: &DataQueryArgs) -> EngineContext {
        let mut ctx = EngineContext::new(args.data_model.clone(), args.prompt.clone())
            .with_clients(self.clients.clone())
            .with_input_files(self.input_files.clone())
            .with_max_retries(args.max_retries.unwrap_or(self.max_retries));
        if let Some(excerpt) = &args.schema_excerpt {
            ctx = ctx.with_schema_excerpt(excerpt.clone());
        }
        ctx
    }
}

#[async_trait]
impl Tool for DataQueryTool {
    fn name(&self) -> &str {
        DATA_QUERY_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Generates and executes analysis code for a data request, returning a table of results"
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        args: Value,
        events: mpsc::Sender<ToolEvent>,
    ) -> CoreResult<()> {
        let _ = events
            .send(ToolEvent::Start {
                tool_name: self.name().to_string(),
                invocation_id: ctx.invocation_id().to_string(),
                metadata: Some(serde_json::json!({ "session_id": ctx.session_id() })),
            })
            .await;

        let args: DataQueryArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => {
                let message = format!("Invalid arguments: {}", e);
                let _ = events
                    .send(ToolEvent::End {
                        output: ToolOutput::err(message.clone()),
                        observation: message,
                    })
                    .await;
                return Ok(());
            }
        };

        let engine_ctx = self.build_context(&args);
        let mut engine = RetryEngine::new(self.generator.clone(), self.executor.clone())
            .with_cancellation(ctx.cancellation_token())
            .with_normalize_options(self.normalize)
            .with_events(events.clone());
        if let Some(validator) = &self.validator {
            engine = engine.with_validator(validator.clone());
        }

        debug!(invocation_id = %ctx.invocation_id(), "data query tool running");
        let (output, observation) = match engine.run_with_context(&engine_ctx).await {
            EngineOutcome::Succeeded { table, log, .. } => {
                if !log.is_empty() {
                    let _ = events.send(ToolEvent::Stdout { text: log }).await;
                }
                let observation = format!(
                    "Produced {} rows x {} columns for: {}",
                    table.stats.row_count, table.stats.column_count, engine_ctx.prompt
                );
                (table_output(&table), observation)
            }
            EngineOutcome::Failed { attempts } => {
                let last_error = attempts
                    .last()
                    .map(|a| a.error.clone())
                    .unwrap_or_else(|| "no attempts were made".to_string());
                let observation = format!(
                    "Code generation failed after {} attempts: {}",
                    attempts.len(),
                    last_error
                );
                let history = serde_json::to_value(&attempts).unwrap_or(Value::Null);
                (ToolOutput::err(last_error).with_data(history), observation)
            }
            EngineOutcome::Cancelled => (
                table_output(&TablePayload::empty()),
                "Cancelled before completion; returning empty result".to_string(),
            ),
        };

        let _ = events.send(ToolEvent::End { output, observation }).await;
        Ok(())
    }
}

fn table_output(table: &TablePayload) -> ToolOutput {
    ToolOutput::ok(serde_json::to_value(table).unwrap_or(Value::Null))
}
