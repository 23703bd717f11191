//! Candidate source backed by the BigQuery `jobs.query` REST endpoint.

use super::auth::BigQueryAuth;
use super::query::render_page_query;
use super::{CandidateFilter, CandidateSource};
use crate::core::config::{get_retry_delay, Config};
use crate::core::error::{AppError, Result, SourceError};
use crate::core::models::CandidateRecord;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use url::Url;

const API_ROOT: &str = "https://bigquery.googleapis.com/bigquery/v2/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct Field {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorProto,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Maps the column names seen in lead tables onto `CandidateRecord` fields.
fn canonical_column(name: &str) -> &str {
    match name {
        "firstName" | "firstname" => "first_name",
        "lastName" | "lastname" => "last_name",
        "company_name" | "companyName" => "company",
        "linkedin_url" | "linkedinUrl" | "linkedin" => "profile_url",
        "jobTitle" | "title" => "job_title",
        "companyDomain" | "domain" => "company_domain",
        "sourceDetail" => "source_detail",
        other => other,
    }
}

/// Turns the tabular `schema` + `rows` payload into records.
///
/// Non-string scalars are stringified; when two columns map onto the same
/// field the first one wins.
fn decode_rows(response: QueryResponse) -> std::result::Result<Vec<CandidateRecord>, SourceError> {
    let Some(schema) = response.schema else {
        return if response.rows.is_empty() {
            Ok(Vec::new())
        } else {
            Err(SourceError::Decode("rows returned without a schema".into()))
        };
    };
    let columns: Vec<&str> = schema
        .fields
        .iter()
        .map(|f| canonical_column(&f.name))
        .collect();

    let mut records = Vec::with_capacity(response.rows.len());
    for row in response.rows {
        let mut object = Map::new();
        for (column, cell) in columns.iter().zip(row.f) {
            if object.contains_key(*column) {
                continue;
            }
            let value = match cell.v {
                v @ (Value::Null | Value::String(_)) => v,
                other => Value::String(other.to_string()),
            };
            object.insert((*column).to_string(), value);
        }
        let record: CandidateRecord = serde_json::from_value(Value::Object(object))
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

fn categorize(status: reqwest::StatusCode, body: &str) -> SourceError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(300).collect());
    match status {
        reqwest::StatusCode::UNAUTHORIZED => SourceError::Auth(message),
        reqwest::StatusCode::FORBIDDEN => SourceError::Permission(message),
        reqwest::StatusCode::NOT_FOUND => SourceError::NotFound(message),
        reqwest::StatusCode::BAD_REQUEST if message.to_lowercase().contains("syntax error") => {
            SourceError::Syntax(message)
        }
        _ => SourceError::from_message(format!("HTTP {}: {}", status, message)),
    }
}

/// Pages through the configured query template.
#[derive(Clone)]
pub struct BigQuerySource {
    http_client: Arc<Client>,
    endpoint: Url,
    query_template: String,
    auth: Arc<BigQueryAuth>,
    config: Arc<Config>,
}

impl BigQuerySource {
    pub fn new(config: &Config) -> Result<Self> {
        let project_id = config
            .project_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::Config("source.project_id is not set".into()))?;
        let query_template = config
            .query_template
            .clone()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| AppError::Config("source.query_template is not set".into()))?;

        let endpoint = Url::parse(API_ROOT)?.join(&format!("projects/{}/queries", project_id.trim()))?;
        let http_client = Client::builder()
            .timeout(config.source_timeout)
            .build()
            .map_err(|e| AppError::Initialization(format!("Failed to build HTTP client: {}", e)))?;
        let auth = BigQueryAuth::from_config(config)?;

        tracing::debug!(target: "source", "BigQuery source initialized for project {}", project_id);
        Ok(Self {
            http_client: Arc::new(http_client),
            endpoint,
            query_template,
            auth: Arc::new(auth),
            config: Arc::new(config.clone()),
        })
    }

    async fn run_query(&self, sql: &str) -> std::result::Result<Vec<CandidateRecord>, SourceError> {
        let body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "location": self.config.source_location,
            "timeoutMs": self.config.source_timeout.as_millis() as u64,
        });
        let token = self.auth.bearer().await?;
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(format!(
                        "query timed out after {}s",
                        self.config.source_timeout.as_secs()
                    ))
                } else {
                    SourceError::Http(e)
                }
            })?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(categorize(status, &text));
        }

        let parsed: QueryResponse =
            serde_json::from_str(&text).map_err(|e| SourceError::Decode(e.to_string()))?;
        if let Some(first) = parsed.errors.first() {
            let message = match first.reason {
                Some(ref reason) => format!("{}: {}", reason, first.message),
                None => first.message.clone(),
            };
            return Err(SourceError::from_message(message));
        }
        if parsed.job_complete == Some(false) {
            return Err(SourceError::Timeout(format!(
                "job did not complete within {}s",
                self.config.source_timeout.as_secs()
            )));
        }
        decode_rows(parsed)
    }
}

#[async_trait]
impl CandidateSource for BigQuerySource {
    async fn fetch_page(
        &self,
        filter: &CandidateFilter,
        limit: usize,
        offset: usize,
    ) -> std::result::Result<Vec<CandidateRecord>, SourceError> {
        let sql = render_page_query(&self.query_template, filter, limit, offset);
        tracing::debug!(target: "source", "Executing query: {}", sql);

        let attempts = self.config.source_max_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            let started = Instant::now();
            match self.run_query(&sql).await {
                Ok(rows) => {
                    tracing::info!(target: "source", "BigQuery returned {} rows in {:.2?} (attempt {}/{})",
                        rows.len(), started.elapsed(), attempt, attempts);
                    return Ok(rows);
                }
                Err(e) => {
                    tracing::warn!(target: "source", "BigQuery attempt {}/{} failed [{}]: {}",
                        attempt, attempts, e.kind(), e);
                    last_error = Some(e);
                    if attempt < attempts {
                        let pause = get_retry_delay(&self.config);
                        tracing::debug!(target: "source", "Retrying in {:?}", pause);
                        sleep(pause).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SourceError::Unknown("no query attempt was made".into())))
    }

    fn name(&self) -> &str {
        "bigquery"
    }
}
