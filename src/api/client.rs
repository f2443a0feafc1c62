//! Authenticated requests to the app backend.

use crate::auth::TokenStore;
use crate::config::Config;
use crate::error::{ApiError, AppError, AuthError};
use anyhow::{Context, Result};
use reqwest::{Method, Response};
use serde::Serialize;
use tracing::{debug, error};
use url::Url;

/// Response header carrying a rotated access token.
pub const HEADER_NEW_ACCESS_TOKEN: &str = "X-New-Access-Token";

/// HTTP client that attaches the stored credentials to every request.
pub struct ApiClient {
    base_url: Url,
    http_client: reqwest::Client,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.http_connect_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: config.base_url()?,
            http_client,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Resolve a path or absolute URL against the backend origin.
    pub fn resolve(&self, target: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(target)
            .map_err(|e| ApiError::RequestFailed(format!("Invalid URL {}: {}", target, e)))
    }

    /// Send a request carrying the auth headers.
    ///
    /// A rotated access token in the response is adopted by `store`. A 401 is
    /// returned as `AuthError::Unauthorized`; the caller decides where to send
    /// the user.
    pub async fn fetch_with_auth<B: Serialize + ?Sized>(
        &self,
        store: &TokenStore,
        method: Method,
        target: &str,
        body: Option<&B>,
    ) -> Result<Response, AppError> {
        let url = self.resolve(target)?;

        let headers = store.to_headers();
        if headers.is_empty() {
            error!("No auth data available");
            return Err(AuthError::MissingCredentials.into());
        }

        let mut request = self.http_client.request(method, url.clone());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        if let Some(token) = response
            .headers()
            .get(HEADER_NEW_ACCESS_TOKEN)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            store.adopt_access_token(token)?;
        }

        let status = response.status();
        if status.is_success() {
            debug!("{} -> HTTP {}", url.path(), status.as_u16());
            return Ok(response);
        }

        error!("Auth request to {} failed: HTTP {}", url.path(), status);

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::Unauthorized.into());
        }

        Err(ApiError::RequestFailed(
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LaunchParams;
    use crate::config::test_config;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn signed_in_store(config: &Config) -> TokenStore {
        let store = TokenStore::new(Arc::new(MemoryStorage::new()), config);
        store
            .save(&LaunchParams {
                init_data: Some("abc".into()),
                start_param: Some("tok1".into()),
                refresh_token: Some("ref1".into()),
                return_to: None,
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_fetch_attaches_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/twa/api/gifts"))
            .and(header("X-Start-Param", "tok1"))
            .and(header("X-Refresh-Token", "ref1"))
            .and(header("X-Init-Data", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let store = signed_in_store(&config);
        let client = ApiClient::new(&config).unwrap();

        let response = client
            .fetch_with_auth::<()>(&store, Method::GET, "/twa/api/gifts", None)
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_fetch_adopts_rotated_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/twa/api/gifts"))
            .respond_with(ResponseTemplate::new(201).insert_header("X-New-Access-Token", "tok2"))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let store = signed_in_store(&config);
        let client = ApiClient::new(&config).unwrap();

        client
            .fetch_with_auth(
                &store,
                Method::POST,
                "/twa/api/gifts",
                Some(&serde_json::json!({ "name": "Book" })),
            )
            .await
            .unwrap();

        let record = store.read().unwrap().unwrap();
        assert_eq!(record.start_param.as_str(), "tok2");
        assert_eq!(record.refresh_token.as_str(), "ref1");
    }

    #[tokio::test]
    async fn test_fetch_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let store = signed_in_store(&config);
        let client = ApiClient::new(&config).unwrap();

        let result = client
            .fetch_with_auth::<()>(&store, Method::GET, "/twa/api/gifts", None)
            .await;
        assert!(matches!(result, Err(AppError::Auth(AuthError::Unauthorized))));
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let store = signed_in_store(&config);
        let client = ApiClient::new(&config).unwrap();

        let result = client
            .fetch_with_auth::<()>(&store, Method::GET, "/twa/api/gifts", None)
            .await;
        assert!(matches!(
            result,
            Err(AppError::Api(ApiError::RequestFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_fetch_without_record() {
        let config = test_config("http://127.0.0.1:9");
        let store = TokenStore::new(Arc::new(MemoryStorage::new()), &config);
        let client = ApiClient::new(&config).unwrap();

        let result = client
            .fetch_with_auth::<()>(&store, Method::GET, "/twa/api/gifts", None)
            .await;
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::MissingCredentials))
        ));
    }
}
