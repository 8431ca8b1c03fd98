//! BigQuery access for the agent's tools.
//!
//! [`Warehouse`] is the seam between the tools and the warehouse; the
//! production implementation is [`BigQueryClient`], a thin wrapper over the
//! BigQuery v2 REST API authenticated with a service-account key.

mod auth;
mod client;
mod rows;

pub use auth::{AuthError, ServiceAccountKey, ServiceAccountTokenSource, TokenSource};
pub use client::BigQueryClient;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BigQueryError {
    #[error("BigQuery request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("BigQuery API error {code} ({status}): {message}")]
    Api {
        code: u16,
        status: String,
        message: String,
    },

    #[error("Could not decode BigQuery response: {0}")]
    Decode(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Invalid table reference '{0}'")]
    InvalidTable(String),
}

/// A fully-qualified `project.dataset.table` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TablePath {
    project: String,
    dataset: String,
    table: String,
}

impl TablePath {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Resolve a table name the model supplied against this table's project
    /// and dataset.
    ///
    /// Accepts `table`, `dataset.table`, `project.dataset.table` and the
    /// legacy `project:dataset.table` form. Surrounding backticks are ignored.
    pub fn resolve(&self, name: &str) -> Result<TablePath, BigQueryError> {
        let normalized = name.trim().trim_matches('`').replace(':', ".");
        let parts: Vec<&str> = normalized.split('.').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(BigQueryError::InvalidTable(name.to_string()));
        }

        match parts.as_slice() {
            [table] => Ok(TablePath::new(&self.project, &self.dataset, *table)),
            [dataset, table] => Ok(TablePath::new(&self.project, *dataset, *table)),
            [project, dataset, table] => Ok(TablePath::new(*project, *dataset, *table)),
            _ => Err(BigQueryError::InvalidTable(name.to_string())),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Column metadata from a table schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Decoded rows of a completed query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
}

impl QueryResult {
    /// One JSON object per line.
    pub fn to_lines(&self) -> String {
        self.rows
            .iter()
            .map(|row| Value::Object(row.clone()).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DryRunInfo {
    pub total_bytes_processed: u64,
    pub columns: Vec<ColumnInfo>,
}

/// The warehouse operations the tools can invoke.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// The table every operation defaults to.
    fn table(&self) -> &TablePath;

    async fn list_tables(&self) -> Result<Vec<String>, BigQueryError>;

    async fn describe_table(&self, table: &TablePath) -> Result<Vec<ColumnInfo>, BigQueryError>;

    async fn sample_rows(&self, table: &TablePath, limit: u32)
        -> Result<QueryResult, BigQueryError>;

    async fn dry_run(&self, sql: &str) -> Result<DryRunInfo, BigQueryError>;

    async fn run_query(&self, sql: &str, max_rows: Option<u32>)
        -> Result<QueryResult, BigQueryError>;
}

/// Largest sample a tool may request.
pub const MAX_SAMPLE_ROWS: u32 = 100;

pub(crate) fn sample_sql(table: &TablePath, limit: u32) -> String {
    format!(
        "SELECT * FROM `{}` LIMIT {}",
        table,
        limit.clamp(1, MAX_SAMPLE_ROWS)
    )
}
