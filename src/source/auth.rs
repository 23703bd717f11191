//! Bearer tokens for the BigQuery REST API.
//!
//! Resolution order: a static access token, then service-account JSON given
//! inline, then a service-account key file, then the environment's default
//! Google credentials. Providers mint and refresh tokens themselves.

use crate::core::config::{Config, Secret};
use crate::core::error::{AppError, Result, SourceError};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

pub enum BigQueryAuth {
    /// Fixed token; used as-is until it expires.
    Static(Secret),
    ServiceAccount(Arc<dyn TokenProvider>),
    /// Application default credentials, looked up on first use.
    Default(OnceCell<Arc<dyn TokenProvider>>),
}

impl fmt::Debug for BigQueryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BigQueryAuth::Static(_) => "Static",
            BigQueryAuth::ServiceAccount(_) => "ServiceAccount",
            BigQueryAuth::Default(_) => "Default",
        };
        write!(f, "BigQueryAuth::{}", label)
    }
}

impl BigQueryAuth {
    pub fn from_config(config: &Config) -> Result<Self> {
        if let Some(ref token) = config.access_token {
            tracing::debug!(target: "source", "BigQuery: using static access token");
            return Ok(BigQueryAuth::Static(token.clone()));
        }
        if let Some(ref json) = config.credentials_json {
            let account = CustomServiceAccount::from_json(json.expose()).map_err(|e| {
                AppError::Config(format!(
                    "source.credentials_json is set but is not a valid service-account key: {}",
                    e
                ))
            })?;
            tracing::info!(target: "source", "BigQuery: using inline service-account credentials");
            return Ok(BigQueryAuth::ServiceAccount(Arc::new(account)));
        }
        if let Some(ref path) = config.credentials_file {
            let account = CustomServiceAccount::from_file(path).map_err(|e| {
                AppError::Config(format!("Could not load credentials file '{}': {}", path, e))
            })?;
            tracing::info!(target: "source", "BigQuery: using credentials file {}", path);
            return Ok(BigQueryAuth::ServiceAccount(Arc::new(account)));
        }
        tracing::info!(target: "source", "BigQuery: using default Google credentials");
        Ok(BigQueryAuth::Default(OnceCell::new()))
    }

    /// Current bearer token, refreshed by the provider when needed.
    pub async fn bearer(&self) -> std::result::Result<String, SourceError> {
        let provider = match self {
            BigQueryAuth::Static(token) => return Ok(token.expose().to_string()),
            BigQueryAuth::ServiceAccount(provider) => provider,
            BigQueryAuth::Default(cell) => cell
                .get_or_try_init(gcp_auth::provider)
                .await
                .map_err(|e| SourceError::Auth(format!("no default credentials found: {}", e)))?,
        };
        let token = provider
            .token(SCOPES)
            .await
            .map_err(|e| SourceError::Auth(e.to_string()))?;
        Ok(token.as_str().to_string())
    }
}
