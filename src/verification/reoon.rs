//! HTTP client for the Reoon email verification API.

use super::EmailVerifier;
use crate::core::config::{Config, Secret};
use crate::core::error::{AppError, Result, VerificationCallError};
use crate::core::models::VerificationStatus;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Calls `GET {base_url}?email=..&key=..&mode=..` for each address.
#[derive(Clone)]
pub struct ReoonVerifier {
    http_client: Arc<Client>,
    base_url: Url,
    api_key: Secret,
    mode: String,
}

impl ReoonVerifier {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .verifier_api_key
            .clone()
            .filter(|k| !k.expose().trim().is_empty())
            .ok_or_else(|| AppError::Config("verification.api_key is not set".into()))?;
        let base_url = Url::parse(&config.verifier_base_url)?;
        let http_client = Client::builder()
            .timeout(config.verify_timeout)
            .build()
            .map_err(|e| AppError::Initialization(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client: Arc::new(http_client),
            base_url,
            api_key,
            mode: config.verifier_mode.clone(),
        })
    }

    fn request_url(&self, email: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("email", email)
            .append_pair("key", self.api_key.expose())
            .append_pair("mode", &self.mode);
        url
    }
}

#[async_trait]
impl EmailVerifier for ReoonVerifier {
    async fn verify(
        &self,
        email: &str,
    ) -> std::result::Result<VerificationStatus, VerificationCallError> {
        let started = Instant::now();
        let response = self.http_client.get(self.request_url(email)).send().await?;
        let http_status = response.status();
        if !http_status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(target: "verification", "[{}] Verifier returned HTTP {}: {}", email, http_status, body);
            return Err(VerificationCallError::Service(format!(
                "HTTP {}: {}",
                http_status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: VerifyResponse = response.json().await?;
        let Some(raw) = body.status else {
            return Err(VerificationCallError::Service(
                body.reason
                    .unwrap_or_else(|| "response carried no status".to_string()),
            ));
        };
        let status = VerificationStatus::from_service(&raw);
        tracing::debug!(target: "verification", "[{}] Status={} (raw '{}') in {:.2?}",
            email, status, raw, started.elapsed());
        Ok(status)
    }
}
