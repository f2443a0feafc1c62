//! Where the user is sent when the session cannot continue.

use std::sync::Mutex;

use tracing::{error, info};
use url::Url;

use crate::config::Config;
use crate::error::{AppError, AuthError};

/// A navigation decided by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// The error page, with a message shown to the user.
    ErrorPage { message: String },
    /// The bot's chat, to start a fresh session.
    Bot { username: String },
    /// A page inside the app.
    Page(Url),
}

impl Redirect {
    /// Error page redirect for an auth failure.
    pub fn for_error(err: &AuthError) -> Self {
        Self::ErrorPage {
            message: err.user_message().to_string(),
        }
    }

    /// Resolve the redirect to an absolute URL.
    pub fn to_url(&self, config: &Config) -> Result<Url, AppError> {
        match self {
            Self::ErrorPage { message } => {
                let mut url = Url::parse(&config.error_page_url())
                    .map_err(|e| AppError::Config(format!("Invalid error page URL: {}", e)))?;
                url.query_pairs_mut().append_pair("message", message);
                Ok(url)
            }
            Self::Bot { username } => bot_link(&config.api.bot_link_base, username),
            Self::Page(url) => Ok(url.clone()),
        }
    }
}

/// Deep link to a bot chat, e.g. `https://t.me/gift_bot`.
pub fn bot_link(base: &str, username: &str) -> Result<Url, AppError> {
    let username = username.trim_start_matches('@');
    Url::parse(&format!("{}/{}", base.trim_end_matches('/'), username))
        .map_err(|e| AppError::Config(format!("Invalid bot link: {}", e)))
}

/// Performs navigations.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &Url);
}

/// Opens navigations in the system browser.
#[derive(Debug, Default)]
pub struct BrowserNavigator;

impl Navigator for BrowserNavigator {
    fn navigate(&self, url: &Url) {
        info!("Navigating to {}{}", url.origin().ascii_serialization(), url.path());
        if let Err(e) = open::that(url.as_str()) {
            error!("Failed to open browser: {}", e);
        }
    }
}

/// Records navigations instead of performing them.
#[derive(Debug, Default)]
pub struct MemoryNavigator {
    visited: Mutex<Vec<Url>>,
}

impl MemoryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// All navigations so far, oldest first.
    pub fn visited(&self) -> Vec<Url> {
        self.visited
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<Url> {
        self.visited().pop()
    }
}

impl Navigator for MemoryNavigator {
    fn navigate(&self, url: &Url) {
        self.visited
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.clone());
    }
}
