//! Core agent loop implementation.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::bigquery::Warehouse;
use crate::llm::{ChatMessage, LlmClient, LlmError, ToolCall};
use crate::tools::{FinalQuery, ToolOutput, ToolRegistry};

use super::prompt::build_system_prompt;

/// Tool results longer than this are truncated before going back to the model.
const MAX_TOOL_RESULT_CHARS: usize = 20_000;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Model returned neither a tool call nor an answer (iteration {iteration})")]
    EmptyResponse { iteration: usize },
}

/// Where the controller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    DispatchingTool,
    Done,
    Aborted,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Answer),
    /// The loop budget ran out before the model finished.
    Aborted { max_loops: usize },
}

/// The model's final answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// `run_query` succeeded.
    Query(FinalQuery),
    /// The model replied in text without calling a tool.
    Message(String),
}

/// Result of one agent run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub outcome: Outcome,
    pub dispatches: usize,
    pub history: Vec<ChatMessage>,
}

impl AgentRun {
    pub fn state(&self) -> LoopState {
        match self.outcome {
            Outcome::Completed(_) => LoopState::Done,
            Outcome::Aborted { .. } => LoopState::Aborted,
        }
    }
}

/// Progress notifications emitted while the loop runs.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    LoopStarted {
        iteration: usize,
        dispatches: usize,
        max_loops: usize,
    },
    ToolCall {
        name: String,
        arguments: String,
    },
    ToolResult {
        name: String,
        content: String,
    },
    ToolFailed {
        name: String,
        error: String,
    },
}

struct Dispatch {
    content: String,
    final_query: Option<FinalQuery>,
}

/// The SQL agent.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    warehouse: Arc<dyn Warehouse>,
    tools: ToolRegistry,
    model: String,
    max_loops: usize,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        warehouse: Arc<dyn Warehouse>,
        model: impl Into<String>,
        max_loops: usize,
    ) -> Self {
        Self {
            llm,
            warehouse,
            tools: ToolRegistry::new(),
            model: model.into(),
            max_loops,
        }
    }

    /// Run the loop for one user request.
    ///
    /// At most `max_loops` tools are dispatched. Tool failures (bad SQL,
    /// unknown tools, malformed arguments) are fed back to the model; only
    /// model failures end the run with an error.
    pub async fn run(
        &self,
        prompt: &str,
        on_event: &mut (dyn FnMut(&AgentEvent) + Send),
    ) -> Result<AgentRun, AgentError> {
        let system_prompt = build_system_prompt(self.warehouse.table(), &self.tools);
        let mut history = vec![ChatMessage::system(system_prompt), ChatMessage::user(prompt)];

        let tool_schemas = self.tools.get_tool_schemas();
        let mut dispatches = 0usize;
        let mut iteration = 0usize;
        let mut state = LoopState::AwaitingModel;

        loop {
            iteration += 1;
            tracing::debug!(iteration, dispatches, ?state, "Agent iteration");
            on_event(&AgentEvent::LoopStarted {
                iteration,
                dispatches,
                max_loops: self.max_loops,
            });

            let response = self
                .llm
                .chat_completion(&self.model, &history, Some(&tool_schemas))
                .await?;

            let Some(tool_calls) = response.tool_calls.filter(|calls| !calls.is_empty()) else {
                let Some(content) = response.content else {
                    return Err(AgentError::EmptyResponse { iteration });
                };
                let finish_reason = response.finish_reason.as_deref().unwrap_or("unknown");
                if finish_reason == "length" {
                    tracing::warn!(iteration, "Final answer was cut off at the token limit");
                }
                tracing::info!(iteration, dispatches, finish_reason, "Model returned a final answer");
                history.push(ChatMessage::assistant(content.clone()));
                return Ok(AgentRun {
                    outcome: Outcome::Completed(Answer::Message(content)),
                    dispatches,
                    history,
                });
            };

            if tool_calls.len() > 1 {
                tracing::debug!(count = tool_calls.len(), "Model requested several tool calls; running in order");
            }

            history.push(ChatMessage::assistant_tool_calls(
                response.content,
                tool_calls.clone(),
            ));
            state = LoopState::DispatchingTool;

            for tool_call in &tool_calls {
                tracing::debug!(?state, tool = %tool_call.function.name, "Dispatching tool call");
                on_event(&AgentEvent::ToolCall {
                    name: tool_call.function.name.clone(),
                    arguments: tool_call.function.arguments.clone(),
                });

                let dispatch = self.dispatch(tool_call, on_event).await;
                dispatches += 1;
                history.push(ChatMessage::tool_result(tool_call.id.clone(), dispatch.content));

                if let Some(final_query) = dispatch.final_query {
                    tracing::info!(dispatches, "Final query completed");
                    return Ok(AgentRun {
                        outcome: Outcome::Completed(Answer::Query(final_query)),
                        dispatches,
                        history,
                    });
                }

                if dispatches >= self.max_loops {
                    tracing::warn!(
                        max_loops = self.max_loops,
                        "Exceeded maximum loops without a final query"
                    );
                    return Ok(AgentRun {
                        outcome: Outcome::Aborted {
                            max_loops: self.max_loops,
                        },
                        dispatches,
                        history,
                    });
                }
            }

            state = LoopState::AwaitingModel;
        }
    }

    /// Execute one tool call and render its result message.
    async fn dispatch(
        &self,
        tool_call: &ToolCall,
        on_event: &mut (dyn FnMut(&AgentEvent) + Send),
    ) -> Dispatch {
        let name = tool_call.function.name.as_str();

        let result = match parse_arguments(&tool_call.function.arguments) {
            Ok(args) => self.tools.execute(name, args, self.warehouse.as_ref()).await,
            Err(e) => Err(anyhow::anyhow!("Malformed arguments for {}: {}", name, e)),
        };

        match result {
            Ok(ToolOutput::Observation(value)) => {
                let content = truncate_for_model(&json!({ "result": value }).to_string());
                on_event(&AgentEvent::ToolResult {
                    name: name.to_string(),
                    content: content.clone(),
                });
                Dispatch {
                    content,
                    final_query: None,
                }
            }
            Ok(ToolOutput::Final(final_query)) => {
                let content = truncate_for_model(&json!({ "result": final_query.result }).to_string());
                Dispatch {
                    content,
                    final_query: Some(final_query),
                }
            }
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::warn!(tool = %name, error = %error, "Tool call failed");
                on_event(&AgentEvent::ToolFailed {
                    name: name.to_string(),
                    error: error.clone(),
                });
                Dispatch {
                    content: json!({ "error": error }).to_string(),
                    final_query: None,
                }
            }
        }
    }
}

/// Parse the model's argument text; an empty string means no arguments.
fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

/// Truncate a tool result on a char boundary.
fn truncate_for_model(s: &str) -> String {
    match s.char_indices().nth(MAX_TOOL_RESULT_CHARS) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
    }
}
