use std::{path::PathBuf, time::Duration};

use aula_core::Error;

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Upper bound on `max_retries`; backoff doubles per attempt.
pub const MAX_RETRIES: u32 = 10;

/// Connection settings for [`BigQueryWarehouse`](crate::BigQueryWarehouse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub dataset_id: String,
    /// Service account key file. Not needed when an access token is supplied directly.
    pub credentials_path: Option<PathBuf>,
    /// Bound on every HTTP call, including the token exchange.
    pub request_timeout: Duration,
    /// Attempts per call before giving up on timeouts and server errors.
    pub max_retries: u32,
    pub base_url: String,
    /// Overrides the `token_uri` of the service account key.
    pub token_url: Option<String>,
}

impl BigQueryConfig {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            credentials_path: None,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: None,
        }
    }

    /// Build the configuration from environment variables:
    ///
    /// - `BIGQUERY_PROJECT_ID` and `BIGQUERY_DATASET` (required)
    /// - `BIGQUERY_CREDENTIALS`, falling back to `GOOGLE_APPLICATION_CREDENTIALS`
    /// - `BIGQUERY_TIMEOUT_SECONDS`, `BIGQUERY_MAX_RETRIES`
    /// - `BIGQUERY_BASE_URL`, `BIGQUERY_TOKEN_URL`
    pub fn from_env() -> Result<Self, Error> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{key} is not set")))
        };

        let mut config = Self::new(required("BIGQUERY_PROJECT_ID")?, required("BIGQUERY_DATASET")?);

        config.credentials_path = std::env::var("BIGQUERY_CREDENTIALS")
            .or_else(|_| std::env::var("GOOGLE_APPLICATION_CREDENTIALS"))
            .ok()
            .map(PathBuf::from);

        if let Some(seconds) = env_parse::<u64>("BIGQUERY_TIMEOUT_SECONDS") {
            config.request_timeout = Duration::from_secs(seconds);
        }
        if let Some(retries) = env_parse::<u32>("BIGQUERY_MAX_RETRIES") {
            config.max_retries = retries;
        }
        if let Ok(base_url) = std::env::var("BIGQUERY_BASE_URL") {
            config.base_url = base_url;
        }
        config.token_url = std::env::var("BIGQUERY_TOKEN_URL").ok();

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no warehouse call can work with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.project_id.trim().is_empty() || self.dataset_id.trim().is_empty() {
            return Err(Error::Config(
                "BigQuery project and dataset must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_RETRIES).contains(&self.max_retries) {
            return Err(Error::Config(format!(
                "BIGQUERY_MAX_RETRIES must be between 1 and {MAX_RETRIES}, got {}",
                self.max_retries
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "BIGQUERY_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    pub(crate) fn dataset_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}",
            self.base_url.trim_end_matches('/'),
            self.project_id,
            self.dataset_id
        )
    }

    pub(crate) fn query_url(&self) -> String {
        format!(
            "{}/projects/{}/queries",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }

    /// Fully qualified table name for standard SQL.
    pub(crate) fn qualified_table(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset_id, table)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BigQueryConfig::new("proj", "lms");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.dataset_url(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/proj/datasets/lms"
        );
        assert_eq!(config.qualified_table("courses"), "`proj.lms.courses`");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = BigQueryConfig::new("proj", "lms").with_base_url("http://127.0.0.1:9050/");
        assert_eq!(config.query_url(), "http://127.0.0.1:9050/projects/proj/queries");
    }

    #[test]
    fn test_validate() {
        let config = BigQueryConfig::new("proj", "lms");
        assert!(config.validate().is_ok());
        assert!(config.clone().with_max_retries(MAX_RETRIES).validate().is_ok());

        for retries in [0, MAX_RETRIES + 1, 40, u32::MAX] {
            let err = config.clone().with_max_retries(retries).validate().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{retries}");
            assert!(err.to_string().contains("BIGQUERY_MAX_RETRIES"));
        }

        let zero_timeout = config.clone().with_request_timeout(Duration::ZERO);
        assert!(zero_timeout.validate().is_err());
        assert!(BigQueryConfig::new("", "lms").validate().is_err());
    }
}
