//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Default number of tool dispatches before the agent gives up.
pub const DEFAULT_MAX_LOOPS: usize = 10;

/// BigQuery SQL agent: turns a plain-language request into a validated
/// BigQuery query using an OpenAI model.
#[derive(Debug, Clone, Parser)]
#[command(name = "bq-sql-agent", version, about)]
pub struct Cli {
    /// Path to the Google Cloud service-account JSON key.
    #[arg(short = 'c', long = "credentials")]
    pub credentials: PathBuf,

    /// The request, in plain language.
    #[arg(short = 'p', long = "prompt")]
    pub prompt: String,

    /// Maximum number of tool calls before giving up.
    #[arg(short = 'n', long = "compute", default_value_t = DEFAULT_MAX_LOOPS)]
    pub compute: usize,

    /// Model override (defaults to OPENAI_MODEL, then gpt-4o-mini).
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,
}
