//! HTTP client for the backend token endpoints.

use crate::config::Config;
use crate::error::AuthError;
use crate::storage::SecureString;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Token client for refresh and direct authentication.
pub struct TokenClient {
    refresh_url: String,
    direct_auth_url: String,
    http_client: reqwest::Client,
}

impl TokenClient {
    /// Create a new token client from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.http_connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            refresh_url: config.refresh_url(),
            direct_auth_url: config.direct_auth_url(),
            http_client,
        })
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let response = self
            .http_client
            .post(&self.refresh_url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            // Log error details for debugging (doesn't expose to user)
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!("Token refresh failed: HTTP {} - {}", status, error_body);
            return Err(AuthError::RefreshFailed(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        Ok(token_response)
    }

    /// Authenticate directly with the host's init payload.
    pub async fn direct_auth(
        &self,
        init_data: &str,
        return_url: &str,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http_client
            .post(&self.direct_auth_url)
            .json(&DirectAuthRequest {
                init_data,
                return_url,
            })
            .send()
            .await
            .map_err(|e| AuthError::DirectAuthFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.detail)
                .unwrap_or_else(|| "Authentication failed".to_string());
            tracing::error!("Direct auth failed: HTTP {} - {}", status, detail);
            return Err(AuthError::DirectAuthFailed(detail));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::DirectAuthFailed(e.to_string()))?;

        tracing::info!("Direct authentication succeeded");
        Ok(token_response)
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct DirectAuthRequest<'a> {
    init_data: &'a str,
    return_url: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// Token pair issued by the backend.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: SecureString,
    pub refresh_token: SecureString,
    #[serde(default)]
    pub token_type: String,
}
