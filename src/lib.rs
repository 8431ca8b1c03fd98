//! # BigQuery SQL Agent
//!
//! Turns a plain-language request into a validated BigQuery query.
//!
//! This library provides:
//! - A tool-based agent loop driven by an OpenAI-compatible chat model
//! - BigQuery wrappers for listing, describing, sampling and querying a table
//! - Configuration from CLI arguments and environment variables
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Build context with a system prompt for the configured table and the user's request
//! 2. Call the model, parse its response, execute any tool calls against BigQuery
//! 3. Feed results back to the model, repeat until the final query runs
//!    or the loop budget is exhausted
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bq_sql_agent::{agent::Agent, bigquery::BigQueryClient, llm::OpenAiClient, Config};
//!
//! let config = Config::from_cli(&cli)?;
//! let warehouse = BigQueryClient::connect(config.table.clone(), config.credentials.clone()).await?;
//! let llm = OpenAiClient::new(config.api_key.clone(), &config.api_base)?;
//! let agent = Agent::new(Arc::new(llm), Arc::new(warehouse), &config.model, config.max_loops);
//! let run = agent.run("How many orders shipped last week?", &mut |_| {}).await?;
//! ```

pub mod agent;
pub mod bigquery;
pub mod cli;
pub mod config;
pub mod console;
pub mod llm;
pub mod tools;

pub use config::Config;
