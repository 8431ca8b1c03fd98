//! Query tools: sampling, test runs and the final query.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, FinalQuery, Tool, ToolOutput};
use crate::bigquery::{Warehouse, MAX_SAMPLE_ROWS};

/// Row cap for test runs; enough for the model to sanity-check the shape.
const TEST_PREVIEW_ROWS: u32 = 20;

fn default_sample_size() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
struct SampleTableArgs {
    reasoning: String,
    #[serde(default)]
    table_name: Option<String>,
    #[serde(default = "default_sample_size")]
    row_sample_size: u32,
}

/// Fetch a handful of rows from a table.
pub struct SampleTable;

#[async_trait]
impl Tool for SampleTable {
    fn name(&self) -> &str {
        "sample_table"
    }

    fn description(&self) -> &str {
        "Returns sample rows from a table so you can see real data patterns. Defaults to the configured table."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Why sampling this table helps"
                },
                "table_name": {
                    "type": "string",
                    "description": "Table to sample. Defaults to the configured table."
                },
                "row_sample_size": {
                    "type": "integer",
                    "description": "Number of rows to sample (aim for 3-5 rows)",
                    "minimum": 1,
                    "maximum": MAX_SAMPLE_ROWS
                }
            },
            "required": ["reasoning", "row_sample_size"]
        })
    }

    async fn execute(&self, args: Value, warehouse: &dyn Warehouse) -> anyhow::Result<ToolOutput> {
        let args: SampleTableArgs = parse_args(self.name(), args)?;
        let table = match args.table_name.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(name) => warehouse.table().resolve(name)?,
            None => warehouse.table().clone(),
        };
        let rows = args.row_sample_size.clamp(1, MAX_SAMPLE_ROWS);
        tracing::info!(
            tool = "sample_table",
            table = %table,
            rows,
            reasoning = %args.reasoning,
            "Sampling table"
        );

        let result = warehouse.sample_rows(&table, rows).await?;
        Ok(ToolOutput::Observation(json!({
            "table": table.to_string(),
            "columns": result.columns,
            "rows": result.rows,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    reasoning: String,
    sql_query: String,
}

impl QueryArgs {
    fn sql(&self) -> anyhow::Result<&str> {
        let sql = self.sql_query.trim();
        if sql.is_empty() {
            anyhow::bail!("sql_query must not be empty");
        }
        Ok(sql)
    }
}

/// Validate a candidate query and preview its results.
pub struct TestQuery;

#[async_trait]
impl Tool for TestQuery {
    fn name(&self) -> &str {
        "test_query"
    }

    fn description(&self) -> &str {
        "Validates a SQL query with a dry run and returns a small preview of its results (visible only to you). Always use the complete table path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Why this query is being tested"
                },
                "sql_query": {
                    "type": "string",
                    "description": "The GoogleSQL query to test (must use the complete table path)"
                }
            },
            "required": ["reasoning", "sql_query"]
        })
    }

    async fn execute(&self, args: Value, warehouse: &dyn Warehouse) -> anyhow::Result<ToolOutput> {
        let args: QueryArgs = parse_args(self.name(), args)?;
        let sql = args.sql()?;
        tracing::info!(tool = "test_query", reasoning = %args.reasoning, sql = %sql, "Testing query");

        let plan = warehouse.dry_run(sql).await?;
        let preview = warehouse.run_query(sql, Some(TEST_PREVIEW_ROWS)).await?;

        Ok(ToolOutput::Observation(json!({
            "valid": true,
            "total_bytes_processed": plan.total_bytes_processed,
            "dry_run_columns": plan.columns,
            "columns": preview.columns,
            "total_rows": preview.total_rows,
            "preview_rows": preview.rows,
        })))
    }
}

/// Run the final query and hand its results to the user.
pub struct RunQuery;

#[async_trait]
impl Tool for RunQuery {
    fn name(&self) -> &str {
        "run_query"
    }

    fn description(&self) -> &str {
        "Runs the final, validated SQL query and shows the results to the user. Only call this once you are confident the query is correct. Always use the complete table path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Final explanation of how this query satisfies the user request"
                },
                "sql_query": {
                    "type": "string",
                    "description": "The validated GoogleSQL query to run (must use the complete table path)"
                }
            },
            "required": ["reasoning", "sql_query"]
        })
    }

    async fn execute(&self, args: Value, warehouse: &dyn Warehouse) -> anyhow::Result<ToolOutput> {
        let args: QueryArgs = parse_args(self.name(), args)?;
        let sql = args.sql()?.to_string();
        tracing::info!(tool = "run_query", reasoning = %args.reasoning, sql = %sql, "Running final query");

        let result = warehouse.run_query(&sql, None).await?;
        Ok(ToolOutput::Final(FinalQuery {
            reasoning: args.reasoning,
            sql,
            result,
        }))
    }
}
