//! Tools the model can call to explore and query the warehouse.
//!
//! Every tool takes a `reasoning` argument; it is logged with the call so
//! the run can be followed from the logs.

mod query;
mod schema;

pub use query::{RunQuery, SampleTable, TestQuery};
pub use schema::{DescribeTable, ListTables};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::bigquery::{QueryResult, Warehouse};
use crate::llm::{FunctionSchema, ToolSchema};

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, warehouse: &dyn Warehouse) -> anyhow::Result<ToolOutput>;
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Payload to feed back to the model.
    Observation(Value),
    /// The final query ran; the session is done.
    Final(FinalQuery),
}

/// The query that answered the user's request, with its results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalQuery {
    pub reasoning: String,
    pub sql: String,
    pub result: QueryResult,
}

/// Name and description of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// The fixed set of tools offered to the model.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
            order: Vec::new(),
        };

        registry.register(Arc::new(ListTables));
        registry.register(Arc::new(DescribeTable));
        registry.register(Arc::new(SampleTable));
        registry.register(Arc::new(TestQuery));
        registry.register(Arc::new(RunQuery));

        registry
    }

    fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.order.push(name.clone());
        self.tools.insert(name, tool);
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
            })
            .collect()
    }

    pub fn get_tool_schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSchema {
                schema_type: "function".to_string(),
                function: FunctionSchema {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        warehouse: &dyn Warehouse,
    ) -> anyhow::Result<ToolOutput> {
        let tool = self.tools.get(name).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown tool: {}. Available tools: {}",
                name,
                self.order.join(", ")
            )
        })?;

        tool.execute(args, warehouse).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserialize tool arguments into the tool's typed argument struct.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> anyhow::Result<T> {
    serde_json::from_value(args)
        .map_err(|e| anyhow::anyhow!("Invalid arguments for {}: {}", tool, e))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory warehouse used by the tool and agent tests.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use crate::bigquery::{
        BigQueryError, ColumnInfo, DryRunInfo, QueryResult, TablePath, Warehouse,
    };

    pub struct FakeWarehouse {
        pub table: TablePath,
        pub queries: Mutex<Vec<String>>,
    }

    impl FakeWarehouse {
        pub fn new() -> Self {
            Self {
                table: TablePath::new("acme", "sales", "orders"),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn rows(n: u32) -> QueryResult {
            let rows = (0..n)
                .map(|i| {
                    let mut row = Map::new();
                    row.insert("id".to_string(), json!(i));
                    row
                })
                .collect();
            QueryResult {
                columns: vec!["id".to_string()],
                rows,
                total_rows: Some(u64::from(n)),
            }
        }
    }

    #[async_trait]
    impl Warehouse for FakeWarehouse {
        fn table(&self) -> &TablePath {
            &self.table
        }

        async fn list_tables(&self) -> Result<Vec<String>, BigQueryError> {
            Ok(vec!["orders".to_string(), "customers".to_string()])
        }

        async fn describe_table(&self, table: &TablePath) -> Result<Vec<ColumnInfo>, BigQueryError> {
            if table.table() != "orders" {
                return Err(BigQueryError::Api {
                    code: 404,
                    status: "NOT_FOUND".to_string(),
                    message: format!("Not found: Table {}", table),
                });
            }
            Ok(vec![ColumnInfo {
                name: "id".to_string(),
                data_type: "INTEGER".to_string(),
                mode: "REQUIRED".to_string(),
                description: None,
            }])
        }

        async fn sample_rows(&self, _table: &TablePath, limit: u32) -> Result<QueryResult, BigQueryError> {
            Ok(Self::rows(limit))
        }

        async fn dry_run(&self, sql: &str) -> Result<DryRunInfo, BigQueryError> {
            if !sql.to_uppercase().starts_with("SELECT") {
                return Err(BigQueryError::Api {
                    code: 400,
                    status: "INVALID_ARGUMENT".to_string(),
                    message: "Syntax error".to_string(),
                });
            }
            Ok(DryRunInfo {
                total_bytes_processed: 1024,
                columns: vec![ColumnInfo {
                    name: "id".to_string(),
                    data_type: "INTEGER".to_string(),
                    mode: "NULLABLE".to_string(),
                    description: None,
                }],
            })
        }

        async fn run_query(&self, sql: &str, max_rows: Option<u32>) -> Result<QueryResult, BigQueryError> {
            self.queries.lock().unwrap().push(sql.to_string());
            if sql.contains("missing_column") {
                return Err(BigQueryError::Api {
                    code: 400,
                    status: "INVALID_ARGUMENT".to_string(),
                    message: "Unrecognized name: missing_column".to_string(),
                });
            }
            Ok(Self::rows(max_rows.unwrap_or(3).min(3)))
        }
    }

    pub fn reasoning(extra: Value) -> Value {
        let mut args = json!({"reasoning": "test"});
        if let (Value::Object(base), Value::Object(extra)) = (&mut args, extra) {
            base.extend(extra);
        }
        args
    }
}
