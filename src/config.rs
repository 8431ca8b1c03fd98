//! Configuration management.
//!
//! Configuration comes from the command line plus environment variables
//! (a local `.env` file is loaded by the binary before this runs):
//! - `OPENAI_API_KEY` - Required. API key for the chat completions endpoint.
//! - `BQ_PROJECT_ID` - Required. Project that owns the dataset and is billed for queries.
//! - `BQ_DATASET_ID` - Required. Dataset containing the table.
//! - `BQ_TABLE_NAME` - Required. The table the agent works with.
//! - `OPENAI_MODEL` - Optional. Defaults to `gpt-4o-mini`.
//! - `OPENAI_BASE_URL` - Optional. Defaults to `https://api.openai.com/v1`.

use std::path::PathBuf;

use thiserror::Error;

use crate::bigquery::{AuthError, ServiceAccountKey, TablePath};
use crate::cli::Cli;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Invalid credentials file: {0}")]
    Credentials(#[from] AuthError),
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI API key
    pub api_key: String,

    /// Chat model identifier
    pub model: String,

    /// Base URL of the chat completions API
    pub api_base: String,

    pub project_id: String,
    pub dataset_id: String,
    pub table_name: String,

    /// Fully-qualified table every tool defaults to
    pub table: TablePath,

    /// Path to the service-account key
    pub credentials_path: PathBuf,

    /// Parsed service-account key
    pub credentials: ServiceAccountKey,

    /// Maximum tool dispatches before the run is aborted
    pub max_loops: usize,
}

impl Config {
    /// Build the configuration from CLI arguments and the process environment.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        Self::from_cli_with(cli, |name| std::env::var(name).ok())
    }

    /// Build the configuration with an explicit environment lookup.
    ///
    /// Performs no network access; the credentials file is read and its key
    /// validated locally.
    pub fn from_cli_with<F>(cli: &Cli, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };
        let optional = |name: &str, default: &str| -> String {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let api_key = require("OPENAI_API_KEY")?;
        let project_id = require("BQ_PROJECT_ID")?;
        let dataset_id = require("BQ_DATASET_ID")?;
        let table_name = require("BQ_TABLE_NAME")?;

        if cli.compute == 0 {
            return Err(ConfigError::InvalidValue(
                "--compute".to_string(),
                "loop budget must be at least 1".to_string(),
            ));
        }

        let table = TablePath::new(&project_id, &dataset_id, &table_name)
            .resolve(&table_name)
            .map_err(|e| ConfigError::InvalidValue("BQ_TABLE_NAME".to_string(), e.to_string()))?;

        let model = cli
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| optional("OPENAI_MODEL", DEFAULT_MODEL));
        let api_base = optional("OPENAI_BASE_URL", DEFAULT_API_BASE);

        let credentials = ServiceAccountKey::from_file(&cli.credentials)?;

        Ok(Self {
            api_key,
            model,
            api_base,
            project_id,
            dataset_id,
            table_name,
            table,
            credentials_path: cli.credentials.clone(),
            credentials,
            max_loops: cli.compute,
        })
    }
}
