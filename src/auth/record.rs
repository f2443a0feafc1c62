//! The persisted auth record and the launch parameters it is built from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, StorageError};
use crate::storage::SecureString;

/// Query parameter carrying the host's init payload.
pub const INIT_DATA_PARAM: &str = "initData";
/// Query parameter carrying the access token.
pub const START_PARAM: &str = "tgWebAppStartParam";
/// Query parameter carrying the refresh token.
pub const REFRESH_TOKEN_PARAM: &str = "refresh_token";
/// Query parameter naming a page to continue to after launch.
pub const RETURN_TO_PARAM: &str = "return_to";

/// Authentication state persisted in local storage.
///
/// Stored as `{initData, startParam, refreshToken, timestamp}` where
/// `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    /// Opaque payload issued by the host at launch. May be empty.
    #[serde(default)]
    pub init_data: String,
    /// Short-lived access token.
    pub start_param: SecureString,
    /// Long-lived credential used to mint a new `start_param`.
    pub refresh_token: SecureString,
    /// Last time the record was written or touched.
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
}

impl AuthRecord {
    /// Create a record issued now.
    pub fn new(
        init_data: impl Into<String>,
        start_param: impl Into<SecureString>,
        refresh_token: impl Into<SecureString>,
    ) -> Self {
        Self {
            init_data: init_data.into(),
            start_param: start_param.into(),
            refresh_token: refresh_token.into(),
            issued_at: Utc::now(),
        }
    }

    /// Parse a stored record.
    pub fn decode(raw: &str) -> Result<Self, AuthError> {
        serde_json::from_str(raw).map_err(|e| AuthError::CorruptRecord(e.to_string()))
    }

    /// Serialize for storage.
    pub fn encode(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    /// Age of the record at `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }

    /// A record is valid while its age does not exceed `ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age_at(now) <= ttl
    }

    /// Copy of this record with `issued_at` moved to `now`.
    pub fn touched(&self, now: DateTime<Utc>) -> Self {
        Self {
            issued_at: now,
            ..self.clone()
        }
    }

    /// Copy of this record carrying a new token pair.
    pub fn with_tokens(
        &self,
        start_param: SecureString,
        refresh_token: SecureString,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            init_data: self.init_data.clone(),
            start_param,
            refresh_token,
            issued_at: now,
        }
    }
}

/// Parameters the page was launched with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchParams {
    pub init_data: Option<String>,
    pub start_param: Option<String>,
    pub refresh_token: Option<String>,
    pub return_to: Option<String>,
}

impl LaunchParams {
    /// Collect launch parameters from the page URL and the host's init payload.
    ///
    /// The host payload takes precedence over an `initData` query parameter.
    /// Empty values count as absent.
    pub fn from_url(page: &Url, host_init_data: Option<&str>) -> Self {
        let mut params = Self {
            init_data: non_empty(host_init_data.map(str::to_string)),
            ..Self::default()
        };

        for (key, value) in page.query_pairs() {
            let value = non_empty(Some(value.into_owned()));
            match &*key {
                INIT_DATA_PARAM if params.init_data.is_none() => params.init_data = value,
                START_PARAM => params.start_param = value,
                REFRESH_TOKEN_PARAM => params.refresh_token = value,
                RETURN_TO_PARAM => params.return_to = value,
                _ => {}
            }
        }

        params
    }

    /// Build a record when all three credentials are present.
    pub fn to_record(&self) -> Option<AuthRecord> {
        match (&self.init_data, &self.start_param, &self.refresh_token) {
            (Some(init), Some(start), Some(refresh)) => {
                Some(AuthRecord::new(init.as_str(), start.as_str(), refresh.as_str()))
            }
            _ => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
