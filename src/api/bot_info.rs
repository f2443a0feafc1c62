//! Bot username lookup, used to send the user back to the bot chat.

use crate::error::ApiError;
use serde::Deserialize;
use std::sync::Mutex;
use tracing::{debug, info};

/// Resolves and caches the bot username.
pub struct BotDirectory {
    bot_info_url: String,
    username: Mutex<Option<String>>,
}

impl BotDirectory {
    pub fn new(bot_info_url: impl Into<String>, username: Option<String>) -> Self {
        Self {
            bot_info_url: bot_info_url.into(),
            username: Mutex::new(username.filter(|u| !u.is_empty())),
        }
    }

    /// Cached username, if one is known.
    pub fn cached(&self) -> Option<String> {
        self.username
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_username(&self, username: impl Into<String>) {
        let username = username.into();
        info!("Bot username set: {}", username);
        *self.username.lock().unwrap_or_else(|e| e.into_inner()) = Some(username);
    }

    /// Cached username, or fetch it from the bot-info endpoint.
    pub async fn resolve(&self, http_client: &reqwest::Client) -> Result<String, ApiError> {
        if let Some(username) = self.cached() {
            return Ok(username);
        }

        debug!("Bot username not cached, fetching {}", self.bot_info_url);

        let response = http_client
            .get(&self.bot_info_url)
            .send()
            .await
            .map_err(|e| ApiError::BotLookupFailed(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                let info: BotInfo = response
                    .json()
                    .await
                    .map_err(|e| ApiError::ParseFailed(e.to_string()))?;

                if info.username.is_empty() {
                    return Err(ApiError::BotLookupFailed("Empty username".into()));
                }

                self.set_username(info.username.clone());
                Ok(info.username)
            }
            status => Err(ApiError::BotLookupFailed(format!("HTTP {}", status))),
        }
    }
}

/// Bot info returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BotInfo {
    pub username: String,
}
