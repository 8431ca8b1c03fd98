//! Dataset and table introspection tools.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, Tool, ToolOutput};
use crate::bigquery::Warehouse;

#[derive(Debug, Deserialize)]
struct ListTablesArgs {
    reasoning: String,
}

/// List the tables in the configured dataset.
pub struct ListTables;

#[async_trait]
impl Tool for ListTables {
    fn name(&self) -> &str {
        "list_tables"
    }

    fn description(&self) -> &str {
        "Returns the list of tables available in the configured dataset."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Why listing tables helps with the user request"
                }
            },
            "required": ["reasoning"]
        })
    }

    async fn execute(&self, args: Value, warehouse: &dyn Warehouse) -> anyhow::Result<ToolOutput> {
        let args: ListTablesArgs = parse_args(self.name(), args)?;
        let table = warehouse.table();
        tracing::info!(
            tool = "list_tables",
            dataset = %format!("{}.{}", table.project(), table.dataset()),
            reasoning = %args.reasoning,
            "Listing tables"
        );

        let tables = warehouse.list_tables().await?;
        Ok(ToolOutput::Observation(json!({ "tables": tables })))
    }
}

#[derive(Debug, Deserialize)]
struct DescribeTableArgs {
    reasoning: String,
    #[serde(default)]
    table_name: Option<String>,
}

/// Return column metadata for a table.
pub struct DescribeTable;

#[async_trait]
impl Tool for DescribeTable {
    fn name(&self) -> &str {
        "describe_table"
    }

    fn description(&self) -> &str {
        "Returns column names, types, modes and descriptions for a table. Defaults to the configured table."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reasoning": {
                    "type": "string",
                    "description": "Why the table schema is needed"
                },
                "table_name": {
                    "type": "string",
                    "description": "Table to describe; bare, dataset-qualified or fully-qualified. Defaults to the configured table."
                }
            },
            "required": ["reasoning"]
        })
    }

    async fn execute(&self, args: Value, warehouse: &dyn Warehouse) -> anyhow::Result<ToolOutput> {
        let args: DescribeTableArgs = parse_args(self.name(), args)?;
        let table = match args.table_name.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(name) => warehouse.table().resolve(name)?,
            None => warehouse.table().clone(),
        };
        tracing::info!(tool = "describe_table", table = %table, reasoning = %args.reasoning, "Describing table");

        let columns = warehouse.describe_table(&table).await?;
        Ok(ToolOutput::Observation(json!({
            "table": table.to_string(),
            "columns": columns,
        })))
    }
}
