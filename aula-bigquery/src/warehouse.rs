use std::time::Duration;

use async_trait::async_trait;
use aula_core::{
    Error,
    error::{DependencyError, utilities::DependencyResultExt},
    sync::{InsertOutcome, Row, RowFailure, TableSchema, Warehouse},
    validation::validate_table_name,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    BigQueryConfig,
    auth::{ServiceAccountKey, TokenProvider},
    config::MAX_RETRIES,
};

/// Delay before the first retry; doubled on each further attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// [`Warehouse`] backed by a BigQuery dataset.
///
/// Rows are appended with streaming inserts (`tabledata.insertAll`), tables
/// are created from the inferred schema on first use and truncation runs a
/// `DELETE ... WHERE TRUE` query.
pub struct BigQueryWarehouse {
    client: reqwest::Client,
    config: BigQueryConfig,
    tokens: TokenProvider,
}

impl BigQueryWarehouse {
    /// Authenticate with the service account key at `config.credentials_path`.
    pub fn new(config: BigQueryConfig) -> Result<Self, Error> {
        let path = config.credentials_path.as_deref().ok_or_else(|| {
            Error::Config(
                "BigQuery credentials are not configured (set BIGQUERY_CREDENTIALS)".to_string(),
            )
        })?;
        let key = ServiceAccountKey::from_file(path)?;
        let tokens = TokenProvider::service_account(key, config.token_url.clone());
        Self::with_token_provider(config, tokens)
    }

    pub fn with_token_provider(config: BigQueryConfig, tokens: TokenProvider) -> Result<Self, Error> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DependencyError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    pub fn config(&self) -> &BigQueryConfig {
        &self.config
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/tables/{table}", self.config.dataset_url())
    }

    /// Send a request, retrying timeouts, connection failures, 429 and 5xx
    /// responses up to `max_retries` attempts. Other responses are returned
    /// to the caller as they are.
    async fn send(&self, build: impl Fn(&reqwest::Client) -> RequestBuilder) -> Result<Response, Error> {
        let attempts = self.config.max_retries.clamp(1, MAX_RETRIES);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = RETRY_BACKOFF.saturating_mul(2u32.saturating_pow(attempt - 2));
                tokio::time::sleep(backoff).await;
            }

            let token = self.tokens.access_token(&self.client).await?;
            match build(&self.client).bearer_auth(token).send().await {
                Ok(response) if is_retryable(response.status()) => {
                    let status = response.status();
                    tracing::warn!(%status, attempt, "BigQuery request failed, retrying");
                    last_error = Some(DependencyError::Http(format!("BigQuery returned {status}")));
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => {
                    tracing::warn!(attempt, "BigQuery request timed out, retrying");
                    last_error = Some(DependencyError::Timeout(attempt));
                }
                Err(e) if e.is_connect() || e.is_request() => {
                    tracing::warn!(error = %e, attempt, "BigQuery request failed, retrying");
                    last_error = Some(DependencyError::Http(e.to_string()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "BigQuery request failed");
                    return Err(DependencyError::Http(e.to_string()).into());
                }
            }
        }

        let error = last_error.unwrap_or(DependencyError::Timeout(attempts));
        tracing::error!(error = %error, attempts, "BigQuery request gave up");
        Err(error.into())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn api_error(response: Response, action: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(%status, body = %body, "Failed to {action}");
    DependencyError::Warehouse(format!("Failed to {action}: {status}")).into()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<InsertRow<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRow<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    insert_id: Option<String>,
    json: &'a Row,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertError>,
}

#[derive(Debug, Deserialize)]
struct InsertError {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Streaming inserts are de-duplicated on `insertId`. Rows with an `id` use
/// it together with their change timestamp, so a re-sent copy of the same
/// version is dropped while an updated version still lands.
fn insert_id(table: &str, row: &Row) -> Option<String> {
    let id = match row.get("id")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };

    let version = ["updated_at", "created_at"]
        .iter()
        .find_map(|column| match row.get(*column)? {
            Value::Null => None,
            Value::String(at) => Some(at.clone()),
            other => Some(other.to_string()),
        });

    Some(match version {
        Some(version) => format!("{table}:{id}:{version}"),
        None => format!("{table}:{id}"),
    })
}

fn table_resource(config: &BigQueryConfig, table: &str, schema: &TableSchema) -> Value {
    let fields: Vec<Value> = schema
        .columns
        .iter()
        .map(|c| json!({ "name": c.name, "type": c.column_type.as_str(), "mode": "NULLABLE" }))
        .collect();

    json!({
        "tableReference": {
            "projectId": config.project_id,
            "datasetId": config.dataset_id,
            "tableId": table,
        },
        "schema": { "fields": fields },
    })
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<(), Error> {
        validate_table_name(table)?;
        let url = self.table_url(table);

        let response = self.send(|client| client.get(&url)).await?;
        match response.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            _ => return Err(api_error(response, "look up table").await),
        }

        tracing::info!(table, columns = schema.columns.len(), "Creating BigQuery table");

        let body = table_resource(&self.config, table, schema);
        let tables_url = format!("{}/tables", self.config.dataset_url());
        let response = self
            .send(|client| client.post(&tables_url).json(&body))
            .await?;

        // Another run may have created it in the meantime
        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(api_error(response, "create table").await)
        }
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<InsertOutcome, Error> {
        validate_table_name(table)?;
        if rows.is_empty() {
            return Ok(InsertOutcome::success());
        }

        let request = InsertAllRequest {
            skip_invalid_rows: true,
            ignore_unknown_values: false,
            rows: rows
                .iter()
                .map(|row| InsertRow {
                    insert_id: insert_id(table, row),
                    json: row,
                })
                .collect(),
        };
        let url = format!("{}/insertAll", self.table_url(table));

        let response = self
            .send(|client| client.post(&url).json(&request))
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response, "insert rows").await);
        }

        let body: InsertAllResponse = response
            .json()
            .await
            .map_warehouse_err("Invalid insertAll response")?;

        let failed = body
            .insert_errors
            .into_iter()
            .map(|error| RowFailure {
                index: error.index,
                reason: error
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.reason, e.message))
                    .collect::<Vec<_>>()
                    .join("; "),
            })
            .collect::<Vec<_>>();

        if !failed.is_empty() {
            tracing::warn!(table, rejected = failed.len(), total = rows.len(), "BigQuery rejected rows");
        }
        Ok(InsertOutcome { failed })
    }

    async fn truncate(&self, table: &str) -> Result<(), Error> {
        validate_table_name(table)?;
        let body = json!({
            "query": format!("DELETE FROM {} WHERE TRUE", self.config.qualified_table(table)),
            "useLegacySql": false,
        });
        let url = self.config.query_url();

        let response = self.send(|client| client.post(&url).json(&body)).await?;
        match response.status() {
            status if status.is_success() => {
                tracing::info!(table, "Truncated BigQuery table");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                tracing::debug!(table, "Table does not exist yet, nothing to truncate");
                Ok(())
            }
            _ => Err(api_error(response, "truncate table").await),
        }
    }
}
