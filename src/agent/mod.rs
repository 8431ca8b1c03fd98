//! Agent module - the conversational loop controller.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Seed the history with a system prompt for the configured table and the user's request
//! 2. Call the model with the BigQuery tools
//! 3. If the model requests a tool call, execute it and feed the result back
//! 4. Repeat until `run_query` succeeds, the model answers in text, or the loop budget runs out

mod agent_loop;
mod prompt;

pub use agent_loop::{Agent, AgentError, AgentEvent, AgentRun, Answer, LoopState, Outcome};
pub use prompt::build_system_prompt;
