//! Blocking BigQuery REST client and the [`QueryService`] seam.
//!
//! Everything above this module talks to a `&dyn QueryService`, so the
//! browser and manifest code can be driven by an in-memory fake in tests.
//! [`BigQueryClient`] is the production implementation: it issues
//! `jobs.query`, polls `jobs.getQueryResults` until the job completes, and
//! follows page tokens until the full result is read.

use crate::auth::{AuthError, Credentials};
use crate::frame::{Column, ColumnKind, Frame, FrameError, Value};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Dataset used when the caller does not name one.
pub const DEFAULT_DATASET: &str = "development";

const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Server-side wait per `jobs.query` / `jobs.getQueryResults` call.
const QUERY_WAIT_MS: u64 = 10_000;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("request to BigQuery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("BigQuery returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid database name '{0}' (expected `project.dataset` or `dataset`)")]
    InvalidDatabase(String),

    #[error("malformed query result: {0}")]
    Decode(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// A `project.dataset` pair. Bare dataset names resolve against the client's
/// project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseRef {
    pub project: String,
    pub dataset: String,
}

impl DatabaseRef {
    pub fn parse(name: &str, default_project: &str) -> ClientResult<Self> {
        let name = name.trim().trim_matches('`');
        let parts: Vec<&str> = name.split('.').collect();
        match parts.as_slice() {
            [dataset] if !dataset.is_empty() => Ok(Self {
                project: default_project.to_string(),
                dataset: (*dataset).to_string(),
            }),
            [project, dataset] if !project.is_empty() && !dataset.is_empty() => Ok(Self {
                project: (*project).to_string(),
                dataset: (*dataset).to_string(),
            }),
            _ => Err(ClientError::InvalidDatabase(name.to_string())),
        }
    }

    /// Fully qualified, backtick-quoted table path for standard SQL.
    pub fn table_path(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, table)
    }
}

impl fmt::Display for DatabaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.dataset)
    }
}

/// Operations the browser, manifest builder and entry scripts need from the
/// remote analytic-query service.
pub trait QueryService {
    /// Datasets visible in `project`.
    fn list_databases(&self, project: &str) -> ClientResult<Vec<String>>;

    /// Tables in `database`, sorted by name.
    fn list_tables(&self, database: &str) -> ClientResult<Vec<String>>;

    /// Exact row count of one table.
    fn count_rows(&self, database: &str, table: &str) -> ClientResult<u64>;

    /// A bounded slice of a table, optionally projected to `columns`.
    fn fetch_window(
        &self,
        database: &str,
        table: &str,
        columns: Option<&[String]>,
        limit: u64,
        offset: u64,
    ) -> ClientResult<Frame>;

    /// Arbitrary standard SQL.
    fn query(&self, sql: &str) -> ClientResult<Frame>;
}

/// Build the SQL for a bounded window. Identifiers are backtick-quoted.
pub fn window_sql(
    db: &DatabaseRef,
    table: &str,
    columns: Option<&[String]>,
    limit: u64,
    offset: u64,
) -> String {
    let projection = match columns {
        Some(cols) if !cols.is_empty() => cols
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    };
    let mut sql = format!(
        "SELECT {projection} FROM {} LIMIT {limit}",
        db.table_path(table)
    );
    if offset > 0 {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
    sql
}

pub fn count_sql(db: &DatabaseRef, table: &str) -> String {
    format!("SELECT COUNT(*) AS `count` FROM {}", db.table_path(table))
}

/// Handle to the BigQuery REST API, bound to a billing project and a
/// default dataset.
pub struct BigQueryClient {
    http: reqwest::blocking::Client,
    credentials: Credentials,
    project_id: String,
    dataset_id: String,
    api_base: String,
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .field("dataset_id", &self.dataset_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// API base URL (overridable for testing).
fn api_base_url() -> String {
    dotenvy::var("BQB_BIGQUERY_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
}

/// Construct a client. Performs no I/O; a missing dataset surfaces on the
/// first query.
pub fn connect(
    credentials: Credentials,
    project_id: impl Into<String>,
    dataset_id: Option<&str>,
) -> ClientResult<BigQueryClient> {
    let http = reqwest::blocking::Client::builder()
        .user_agent(concat!("bq-browser/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(BigQueryClient {
        http,
        credentials,
        project_id: project_id.into(),
        dataset_id: dataset_id.unwrap_or(DEFAULT_DATASET).to_string(),
        api_base: api_base_url().trim_end_matches('/').to_string(),
    })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
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
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListEntry {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl BigQueryClient {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn database(&self, name: &str) -> ClientResult<DatabaseRef> {
        DatabaseRef::parse(name, &self.project_id)
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> ClientResult<T> {
        let token = self.credentials.access_token()?;
        trace!(%url, "GET");
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()?;
        decode_response(resp)
    }

    fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> ClientResult<T> {
        let token = self.credentials.access_token()?;
        trace!(%url, "POST");
        let resp = self.http.post(url).bearer_auth(token).json(body).send()?;
        decode_response(resp)
    }

    fn run_query(&self, sql: &str) -> ClientResult<Frame> {
        debug!(%sql, "running query");
        let url = format!(
            "{}/projects/{}/queries",
            self.api_base,
            urlencoding::encode(&self.project_id)
        );
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_WAIT_MS,
            "defaultDataset": {
                "projectId": self.project_id,
                "datasetId": self.dataset_id,
            },
        });
        let mut page: QueryResponse = self.post_json(&url, &body)?;

        let job = page.job_reference.take();
        while !page.job_complete {
            let job = job
                .as_ref()
                .ok_or_else(|| ClientError::Decode("incomplete job without a job reference".into()))?;
            debug!(job_id = %job.job_id, "waiting for query job");
            page = self.query_results(job, None)?;
        }

        let schema = page
            .schema
            .take()
            .ok_or_else(|| ClientError::Decode("completed query without a schema".into()))?;
        let mut rows = std::mem::take(&mut page.rows);
        let mut token = page.page_token.take();
        while let Some(next) = token {
            let job = job
                .as_ref()
                .ok_or_else(|| ClientError::Decode("paged result without a job reference".into()))?;
            let mut more = self.query_results(job, Some(&next))?;
            rows.append(&mut more.rows);
            token = more.page_token;
        }

        build_frame(&schema.fields, rows)
    }

    fn query_results(&self, job: &JobReference, page_token: Option<&str>) -> ClientResult<QueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_base,
            urlencoding::encode(&self.project_id),
            urlencoding::encode(&job.job_id)
        );
        let wait = QUERY_WAIT_MS.to_string();
        let mut query: Vec<(&str, &str)> = vec![("timeoutMs", wait.as_str())];
        if let Some(location) = job.location.as_deref() {
            query.push(("location", location));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json(&url, &query)
    }
}

impl QueryService for BigQueryClient {
    fn list_databases(&self, project: &str) -> ClientResult<Vec<String>> {
        let url = format!(
            "{}/projects/{}/datasets",
            self.api_base,
            urlencoding::encode(project)
        );
        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![("all", "false")];
            if let Some(t) = token.as_deref() {
                query.push(("pageToken", t));
            }
            let page: DatasetList = self.get_json(&url, &query)?;
            names.extend(page.datasets.into_iter().map(|d| d.dataset_reference.dataset_id));
            match page.next_page_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        names.sort();
        Ok(names)
    }

    fn list_tables(&self, database: &str) -> ClientResult<Vec<String>> {
        let db = self.database(database)?;
        let url = format!(
            "{}/projects/{}/datasets/{}/tables",
            self.api_base,
            urlencoding::encode(&db.project),
            urlencoding::encode(&db.dataset)
        );
        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = Vec::new();
            if let Some(t) = token.as_deref() {
                query.push(("pageToken", t));
            }
            let page: TableList = self.get_json(&url, &query)?;
            names.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));
            match page.next_page_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        names.sort();
        debug!(database = %db, tables = names.len(), "listed tables");
        Ok(names)
    }

    fn count_rows(&self, database: &str, table: &str) -> ClientResult<u64> {
        let db = self.database(database)?;
        let frame = self.run_query(&count_sql(&db, table))?;
        let cell = frame
            .rows()
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| ClientError::Decode("count query returned no rows".into()))?;
        match cell {
            Value::Int(n) if *n >= 0 => Ok(*n as u64),
            other => Err(ClientError::Decode(format!(
                "count query returned {other:?}"
            ))),
        }
    }

    fn fetch_window(
        &self,
        database: &str,
        table: &str,
        columns: Option<&[String]>,
        limit: u64,
        offset: u64,
    ) -> ClientResult<Frame> {
        let db = self.database(database)?;
        self.run_query(&window_sql(&db, table, columns, limit, offset))
    }

    fn query(&self, sql: &str) -> ClientResult<Frame> {
        self.run_query(sql)
    }
}

fn decode_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::blocking::Response,
) -> ClientResult<T> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|b| b.error.message)
            .unwrap_or(text);
        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json::<T>()?)
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn column_kind(field: &FieldSchema) -> ColumnKind {
    if field.mode.as_deref() == Some("REPEATED") {
        return ColumnKind::Text;
    }
    match field.field_type.as_str() {
        "INTEGER" | "INT64" => ColumnKind::Int,
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => ColumnKind::Float,
        "BOOLEAN" | "BOOL" => ColumnKind::Bool,
        _ => ColumnKind::Text,
    }
}

fn build_frame(fields: &[FieldSchema], rows: Vec<TableRow>) -> ClientResult<Frame> {
    let columns: Vec<Column> = fields
        .iter()
        .map(|f| Column::new(f.name.clone(), column_kind(f)))
        .collect();
    let decoded = rows
        .into_iter()
        .map(|row| {
            fields
                .iter()
                .zip(row.f)
                .map(|(field, cell)| decode_cell(field, cell.v))
                .collect::<ClientResult<Vec<Value>>>()
        })
        .collect::<ClientResult<Vec<_>>>()?;
    Ok(Frame::new(columns, decoded)?)
}

fn decode_cell(field: &FieldSchema, raw: serde_json::Value) -> ClientResult<Value> {
    let text = match raw {
        serde_json::Value::Null => return Ok(Value::Null),
        serde_json::Value::String(s) => s,
        // Repeated and nested values arrive as arrays/objects; keep them as JSON text.
        other => return Ok(Value::Text(other.to_string())),
    };
    let bad = |what: &str| ClientError::Decode(format!("{what} '{text}' in column {}", field.name));
    Ok(match column_kind(field) {
        ColumnKind::Int => Value::Int(text.parse().map_err(|_| bad("integer"))?),
        ColumnKind::Float => Value::Float(text.parse().map_err(|_| bad("float"))?),
        ColumnKind::Bool => Value::Bool(text.eq_ignore_ascii_case("true")),
        ColumnKind::Text if field.field_type == "TIMESTAMP" => {
            Value::Text(format_timestamp(&text).ok_or_else(|| bad("timestamp"))?)
        }
        ColumnKind::Text => Value::Text(text),
    })
}

/// TIMESTAMP cells are seconds since the epoch as a decimal string.
fn format_timestamp(raw: &str) -> Option<String> {
    let secs: f64 = raw.parse().ok()?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    let dt: DateTime<Utc> = DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))?;
    Some(dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
}
