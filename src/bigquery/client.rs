//! BigQuery v2 REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::{ServiceAccountKey, ServiceAccountTokenSource, TokenSource};
use super::rows::{decode_rows, TableSchema};
use super::{sample_sql, BigQueryError, ColumnInfo, DryRunInfo, QueryResult, TablePath, Warehouse};

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Server-side wait per `queries` / `getQueryResults` call.
const QUERY_TIMEOUT_MS: u64 = 30_000;

const LIST_PAGE_SIZE: u32 = 1000;

/// Warehouse client bound to one configured table.
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    table: TablePath,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    #[serde(default)]
    schema: TableSchema,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<Value>,
    #[serde(default)]
    total_rows: Option<String>,
    #[serde(default)]
    total_bytes_processed: Option<String>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

impl BigQueryClient {
    /// Build a client authenticated with a service-account key.
    ///
    /// Fetches the first access token eagerly, so bad credentials fail here
    /// rather than on the first tool call.
    pub async fn connect(table: TablePath, key: ServiceAccountKey) -> Result<Self, BigQueryError> {
        let source = ServiceAccountTokenSource::new(key)?;
        tracing::info!(account = %source.client_email(), table = %table, "Authenticating to BigQuery");
        source.access_token().await?;

        Self::with_token_source(table, Arc::new(source), DEFAULT_BASE_URL)
    }

    pub fn with_token_source(
        table: TablePath,
        tokens: Arc<dyn TokenSource>,
        base_url: &str,
    ) -> Result<Self, BigQueryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            table,
            tokens,
        })
    }

    fn project_url(&self, project: &str) -> String {
        format!("{}/projects/{}", self.base_url, urlencoding::encode(project))
    }

    fn tables_url(&self, project: &str, dataset: &str) -> String {
        format!(
            "{}/datasets/{}/tables",
            self.project_url(project),
            urlencoding::encode(dataset)
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, BigQueryError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        read_json(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, BigQueryError> {
        let token = self.tokens.access_token().await?;
        let response = self.http.post(url).bearer_auth(token).json(body).send().await?;
        read_json(response).await
    }

    async fn query(&self, sql: &str, max_rows: Option<u32>) -> Result<QueryResult, BigQueryError> {
        let url = format!("{}/queries", self.project_url(self.table.project()));
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });
        if let Some(max) = max_rows {
            body["maxResults"] = json!(max);
        }

        let mut response: QueryResponse = self.post_json(&url, &body).await?;

        while !response.job_complete {
            let job = job_of(&response)?;
            tracing::debug!(job_id = %job.job_id, "Query still running, polling");
            response = self
                .get_json(&self.results_url(&job), &results_params(&job, max_rows, None))
                .await?;
        }

        let schema = response.schema.clone().unwrap_or_default();
        let mut rows = decode_rows(&schema, &response.rows)?;
        let total_rows = response.total_rows.as_deref().and_then(|t| t.parse().ok());

        // A capped preview stops at the first page.
        if max_rows.is_none() {
            let mut page_token = response.page_token.clone().filter(|t| !t.is_empty());
            while let Some(token) = page_token {
                let job = job_of(&response)?;
                tracing::debug!(job_id = %job.job_id, fetched = rows.len(), "Fetching next result page");
                let page: QueryResponse = self
                    .get_json(&self.results_url(&job), &results_params(&job, None, Some(token)))
                    .await?;
                rows.extend(decode_rows(&schema, &page.rows)?);
                page_token = page.page_token.filter(|t| !t.is_empty());
            }
        }

        Ok(QueryResult {
            columns: schema.column_names(),
            rows,
            total_rows,
        })
    }

    fn results_url(&self, job: &JobReference) -> String {
        format!(
            "{}/queries/{}",
            self.project_url(self.table.project()),
            urlencoding::encode(&job.job_id)
        )
    }
}

fn job_of(response: &QueryResponse) -> Result<JobReference, BigQueryError> {
    response
        .job_reference
        .clone()
        .ok_or_else(|| BigQueryError::Decode("query response without a job reference".to_string()))
}

/// Query parameters for `getQueryResults`.
fn results_params(
    job: &JobReference,
    max_rows: Option<u32>,
    page_token: Option<String>,
) -> Vec<(&'static str, String)> {
    let mut params = vec![("timeoutMs", QUERY_TIMEOUT_MS.to_string())];
    if let Some(location) = &job.location {
        params.push(("location", location.clone()));
    }
    if let Some(max) = max_rows {
        params.push(("maxResults", max.to_string()));
    }
    if let Some(token) = page_token {
        params.push(("pageToken", token));
    }
    params
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BigQueryError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(api_error(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| BigQueryError::Decode(e.to_string()))
}

/// Map a Google API error body onto [`BigQueryError::Api`].
fn api_error(http_status: u16, body: &str) -> BigQueryError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = &parsed["error"];

    BigQueryError::Api {
        code: error["code"]
            .as_u64()
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(http_status),
        status: error["status"].as_str().unwrap_or("UNKNOWN").to_string(),
        message: error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| body.trim().to_string()),
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    fn table(&self) -> &TablePath {
        &self.table
    }

    async fn list_tables(&self) -> Result<Vec<String>, BigQueryError> {
        let url = self.tables_url(self.table.project(), self.table.dataset());
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("maxResults", LIST_PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let page: TableList = self.get_json(&url, &params).await?;
            names.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }

    async fn describe_table(&self, table: &TablePath) -> Result<Vec<ColumnInfo>, BigQueryError> {
        let url = format!(
            "{}/{}",
            self.tables_url(table.project(), table.dataset()),
            urlencoding::encode(table.table())
        );
        let resource: TableResource = self.get_json(&url, &[]).await?;
        Ok(resource.schema.columns())
    }

    async fn sample_rows(&self, table: &TablePath, limit: u32) -> Result<QueryResult, BigQueryError> {
        self.query(&sample_sql(table, limit), None).await
    }

    async fn dry_run(&self, sql: &str) -> Result<DryRunInfo, BigQueryError> {
        let url = format!("{}/queries", self.project_url(self.table.project()));
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "dryRun": true,
        });
        let response: QueryResponse = self.post_json(&url, &body).await?;

        Ok(DryRunInfo {
            total_bytes_processed: response
                .total_bytes_processed
                .and_then(|b| b.parse().ok())
                .unwrap_or(0),
            columns: response.schema.map(|s| s.columns()).unwrap_or_default(),
        })
    }

    async fn run_query(&self, sql: &str, max_rows: Option<u32>) -> Result<QueryResult, BigQueryError> {
        self.query(sql, max_rows).await
    }
}
