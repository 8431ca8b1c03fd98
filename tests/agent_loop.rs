//! End-to-end behaviour of the agent loop with a scripted model and an
//! in-memory warehouse.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bq_sql_agent::agent::{Agent, AgentEvent, Answer, LoopState, Outcome};
use bq_sql_agent::bigquery::{
    BigQueryError, ColumnInfo, DryRunInfo, QueryResult, TablePath, Warehouse,
};
use bq_sql_agent::cli::Cli;
use bq_sql_agent::config::{Config, ConfigError};
use bq_sql_agent::llm::{ChatMessage, ChatResponse, LlmClient, LlmError, Role, ToolCall, ToolSchema};
use serde_json::{json, Map, Value};

struct ScriptedModel {
    script: Mutex<VecDeque<ChatResponse>>,
    /// Returned once the script is exhausted.
    fallback: ChatResponse,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    fn new(script: Vec<ChatResponse>, fallback: ChatResponse) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmClient for ScriptedModel {
    async fn chat_completion(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
    ) -> Result<ChatResponse, LlmError> {
        assert_eq!(tools.map(|t| t.len()), Some(5), "all tools are declared");
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[derive(Default)]
struct CountingWarehouse {
    operations: Mutex<HashMap<&'static str, usize>>,
}

impl CountingWarehouse {
    fn bump(&self, op: &'static str) {
        *self.operations.lock().unwrap().entry(op).or_default() += 1;
    }

    fn count(&self, op: &str) -> usize {
        self.operations.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.operations.lock().unwrap().values().sum()
    }
}

fn table() -> &'static TablePath {
    static TABLE: std::sync::OnceLock<TablePath> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| TablePath::new("acme", "sales", "orders"))
}

fn one_row() -> QueryResult {
    let mut row = Map::new();
    row.insert("n".to_string(), json!(42));
    QueryResult {
        columns: vec!["n".to_string()],
        rows: vec![row],
        total_rows: Some(1),
    }
}

#[async_trait]
impl Warehouse for CountingWarehouse {
    fn table(&self) -> &TablePath {
        table()
    }

    async fn list_tables(&self) -> Result<Vec<String>, BigQueryError> {
        self.bump("list_tables");
        Ok(vec!["orders".to_string()])
    }

    async fn describe_table(&self, _table: &TablePath) -> Result<Vec<ColumnInfo>, BigQueryError> {
        self.bump("describe_table");
        Ok(vec![ColumnInfo {
            name: "n".to_string(),
            data_type: "INTEGER".to_string(),
            mode: "NULLABLE".to_string(),
            description: None,
        }])
    }

    async fn sample_rows(&self, _table: &TablePath, _limit: u32) -> Result<QueryResult, BigQueryError> {
        self.bump("sample_rows");
        Ok(one_row())
    }

    async fn dry_run(&self, _sql: &str) -> Result<DryRunInfo, BigQueryError> {
        self.bump("dry_run");
        Ok(DryRunInfo {
            total_bytes_processed: 10,
            columns: Vec::new(),
        })
    }

    async fn run_query(&self, sql: &str, _max_rows: Option<u32>) -> Result<QueryResult, BigQueryError> {
        self.bump("run_query");
        if sql.contains("forbidden") {
            return Err(BigQueryError::Api {
                code: 403,
                status: "PERMISSION_DENIED".to_string(),
                message: "Access Denied".to_string(),
            });
        }
        Ok(one_row())
    }
}

fn tool(name: &str, args: Value) -> ChatResponse {
    ChatResponse {
        tool_calls: Some(vec![ToolCall::new(
            format!("call_{}", name),
            name,
            args.to_string(),
        )]),
        finish_reason: Some("tool_calls".to_string()),
        ..Default::default()
    }
}

fn answer(text: &str) -> ChatResponse {
    ChatResponse {
        content: Some(text.to_string()),
        finish_reason: Some("stop".to_string()),
        ..Default::default()
    }
}

fn sample_forever() -> ChatResponse {
    tool("sample_table", json!({"reasoning": "look again", "row_sample_size": 3}))
}

#[tokio::test]
async fn list_tables_then_answer_dispatches_once() {
    let model = ScriptedModel::new(
        vec![tool("list_tables", json!({"reasoning": "user asked"}))],
        answer("The dataset contains one table: orders."),
    );
    let warehouse = Arc::new(CountingWarehouse::default());
    let agent = Agent::new(model.clone(), warehouse.clone(), "gpt-4o-mini", 10);

    let run = agent.run("list tables", &mut |_| {}).await.unwrap();

    assert_eq!(run.dispatches, 1);
    assert_eq!(run.state(), LoopState::Done);
    assert_eq!(
        run.outcome,
        Outcome::Completed(Answer::Message(
            "The dataset contains one table: orders.".to_string()
        ))
    );
    assert_eq!(warehouse.count("list_tables"), 1);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn repeated_sampling_aborts_after_budget() {
    let model = ScriptedModel::new(Vec::new(), sample_forever());
    let warehouse = Arc::new(CountingWarehouse::default());
    let agent = Agent::new(model.clone(), warehouse.clone(), "gpt-4o-mini", 3);

    let run = agent.run("show me data", &mut |_| {}).await.unwrap();

    assert_eq!(run.outcome, Outcome::Aborted { max_loops: 3 });
    assert_eq!(run.state(), LoopState::Aborted);
    assert_eq!(run.dispatches, 3);
    assert_eq!(warehouse.count("sample_rows"), 3);
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn never_exceeds_budget_for_any_ceiling() {
    for max_loops in 1..=8 {
        let model = ScriptedModel::new(Vec::new(), sample_forever());
        let warehouse = Arc::new(CountingWarehouse::default());
        let agent = Agent::new(model, warehouse.clone(), "gpt-4o-mini", max_loops);

        let run = agent.run("loop", &mut |_| {}).await.unwrap();

        assert_eq!(run.dispatches, max_loops);
        assert_eq!(warehouse.total(), max_loops);
        assert_eq!(run.outcome, Outcome::Aborted { max_loops });
        let tool_results = run.history.iter().filter(|m| m.role == Role::Tool).count();
        assert_eq!(tool_results, max_loops);
    }
}

#[tokio::test]
async fn unknown_tool_is_reported_and_loop_continues() {
    let model = ScriptedModel::new(
        vec![
            tool("drop_table", json!({"reasoning": "oops"})),
            tool(
                "run_query",
                json!({"reasoning": "answer", "sql_query": "SELECT COUNT(*) AS n FROM `acme.sales.orders`"}),
            ),
        ],
        answer("unreachable"),
    );
    let warehouse = Arc::new(CountingWarehouse::default());
    let agent = Agent::new(model.clone(), warehouse.clone(), "gpt-4o-mini", 10);

    let mut events = Vec::new();
    let run = agent
        .run("count orders", &mut |event| events.push(event.clone()))
        .await
        .unwrap();

    let error_msg = run
        .history
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call_drop_table"))
        .and_then(|m| m.content.clone())
        .expect("error fed back for unknown tool");
    let error: Value = serde_json::from_str(&error_msg).unwrap();
    assert!(error["error"].as_str().unwrap().contains("Unknown tool: drop_table"));

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolFailed { name, .. } if name == "drop_table")));

    let Outcome::Completed(Answer::Query(final_query)) = run.outcome else {
        panic!("expected the final query to complete");
    };
    assert_eq!(final_query.result.rows[0]["n"], json!(42));
    assert_eq!(run.dispatches, 2);
    assert_eq!(warehouse.count("run_query"), 1);
}

#[tokio::test]
async fn warehouse_errors_become_conversation_data() {
    let model = ScriptedModel::new(
        vec![tool(
            "test_query",
            json!({"reasoning": "check", "sql_query": "SELECT * FROM forbidden"}),
        )],
        answer("I do not have access to that table."),
    );
    let agent = Agent::new(model, Arc::new(CountingWarehouse::default()), "gpt-4o-mini", 5);

    let run = agent.run("secret data", &mut |_| {}).await.unwrap();

    let tool_msg = run.history.iter().find(|m| m.role == Role::Tool).unwrap();
    let body: Value = serde_json::from_str(tool_msg.content.as_deref().unwrap()).unwrap();
    assert!(body["error"].as_str().unwrap().contains("Access Denied"));
    assert_eq!(run.state(), LoopState::Done);
}

#[tokio::test]
async fn progress_events_follow_the_loop() {
    let model = ScriptedModel::new(
        vec![tool("describe_table", json!({"reasoning": "schema"}))],
        answer("done"),
    );
    let agent = Agent::new(model, Arc::new(CountingWarehouse::default()), "gpt-4o-mini", 4);

    let mut events = Vec::new();
    agent
        .run("describe", &mut |event| events.push(event.clone()))
        .await
        .unwrap();

    assert!(matches!(
        events[0],
        AgentEvent::LoopStarted { iteration: 1, dispatches: 0, max_loops: 4 }
    ));
    assert!(matches!(&events[1], AgentEvent::ToolCall { name, .. } if name == "describe_table"));
    assert!(matches!(&events[2], AgentEvent::ToolResult { name, .. } if name == "describe_table"));
    assert!(matches!(
        events[3],
        AgentEvent::LoopStarted { iteration: 2, dispatches: 1, max_loops: 4 }
    ));
}

#[test]
fn any_missing_required_setting_fails_configuration() {
    let mut credentials = tempfile::NamedTempFile::new().unwrap();
    credentials
        .write_all(include_bytes!("fixtures/service_account.json"))
        .unwrap();
    let cli = Cli {
        credentials: credentials.path().to_path_buf(),
        prompt: "anything".to_string(),
        compute: 10,
        model: None,
    };

    let required = ["OPENAI_API_KEY", "BQ_PROJECT_ID", "BQ_DATASET_ID", "BQ_TABLE_NAME"];
    for mask in 0u32..(1 << required.len()) {
        let env: HashMap<&str, &str> = required
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, name)| (*name, "value"))
            .collect();

        let result = Config::from_cli_with(&cli, |name| env.get(name).map(|v| v.to_string()));
        if env.len() == required.len() {
            assert!(result.is_ok(), "complete configuration should load");
        } else {
            assert!(
                matches!(result, Err(ConfigError::MissingEnvVar(_))),
                "mask {mask:04b} should fail"
            );
        }
    }

    let missing_file = Cli {
        credentials: PathBuf::from("/definitely/not/here.json"),
        ..cli
    };
    let full: HashMap<&str, &str> = required.iter().map(|n| (*n, "value")).collect();
    assert!(matches!(
        Config::from_cli_with(&missing_file, |name| full.get(name).map(|v| v.to_string())),
        Err(ConfigError::Credentials(_))
    ));
}
