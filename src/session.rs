//! The app session: one instance per launch, passed to whatever needs auth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Method, Response};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::api::{ApiClient, BotDirectory};
use crate::auth::scheduler::format_duration;
use crate::auth::{AuthRecord, LaunchParams, RefreshOutcome, TokenClient, TokenStore};
use crate::config::Config;
use crate::error::{AppError, AuthError};
use crate::host::{HostShell, DEFAULT_THEME};
use crate::links;
use crate::navigation::{Navigator, Redirect};
use crate::storage::Storage;

/// Result of initialising the session for a page.
#[derive(Debug, Clone, PartialEq)]
pub enum InitOutcome {
    /// Credentials are in place; `saved` is true when launch parameters were stored.
    Ready { saved: bool },
    /// The user was sent elsewhere.
    Redirected(Redirect),
}

/// Authentication session for a Telegram Mini App.
pub struct Session {
    config: Config,
    origin: Url,
    store: TokenStore,
    tokens: TokenClient,
    api: ApiClient,
    bot: BotDirectory,
    host: Arc<dyn HostShell>,
    navigator: Arc<dyn Navigator>,
    ended: AtomicBool,
}

impl Session {
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        host: Arc<dyn HostShell>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let origin = config.base_url()?;
        let store = TokenStore::new(storage, &config);
        let tokens = TokenClient::new(&config).context("Failed to create token client")?;
        let api = ApiClient::new(&config).context("Failed to create API client")?;
        let bot = BotDirectory::new(config.bot_info_url(), config.api.bot_username.clone());

        Ok(Self {
            config,
            origin,
            store,
            tokens,
            api,
            bot,
            host,
            navigator,
            ended: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn set_bot_username(&self, username: impl Into<String>) {
        self.bot.set_username(username);
    }

    /// True once the user was sent to the error page or the bot.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Running inside the host with an init payload.
    pub fn is_host_environment(&self) -> bool {
        self.host.is_available() && self.host.init_data().is_some_and(|d| !d.is_empty())
    }

    /// Prepare the session for the page at `page`.
    pub fn init(&self, page: &Url) -> InitOutcome {
        let in_host = self.host.is_available();

        if in_host {
            self.host.ready();
            self.host.set_theme(DEFAULT_THEME);
            self.host.show_back_control();
            self.host.expand();
        }

        let launch = LaunchParams::from_url(page, self.host.init_data().as_deref());

        let evicted = match self.store.evict_expired() {
            Ok(evicted) => evicted,
            Err(e) => return InitOutcome::Redirected(self.redirect_for_app_error(&e)),
        };

        let saved = match self.store.save(&launch) {
            Ok(saved) => saved,
            Err(e) => {
                error!("Failed to save auth parameters: {}", e);
                return InitOutcome::Redirected(self.redirect_for_app_error(&e));
            }
        };

        if in_host {
            if let Some(target) = launch
                .return_to
                .as_deref()
                .and_then(|raw| links::resolve_return_to(&self.origin, raw))
            {
                let redirect = Redirect::Page(self.store.to_url(&target));
                self.redirect(&redirect);
                return InitOutcome::Redirected(redirect);
            }
        }

        match self.store.snapshot() {
            Ok(Some(_)) => {}
            Ok(None) if evicted => {
                warn!("Auth record expired and no launch parameters");
                return InitOutcome::Redirected(self.handle_error(&AuthError::Expired));
            }
            Ok(None) => {
                warn!("No auth record and no launch parameters");
                return InitOutcome::Redirected(self.handle_error(&AuthError::MissingCredentials));
            }
            Err(e) => return InitOutcome::Redirected(self.redirect_for_app_error(&e)),
        }

        info!(
            is_web_app = in_host,
            platform = %self.host.platform(),
            bot_username = ?self.bot.cached(),
            saved,
            "Session initialized"
        );

        InitOutcome::Ready { saved }
    }

    /// Attach auth parameters to reserved links.
    pub fn rewrite_links(&self, links: &[String]) -> Vec<String> {
        links::rewrite_links(&self.store, &self.origin, &self.config.auth.link_prefix, links)
    }

    /// Authenticated request to the backend.
    ///
    /// On 401 the record is cleared and the user is sent to the bot.
    pub async fn fetch<B: Serialize + ?Sized>(
        &self,
        method: Method,
        target: &str,
        body: Option<&B>,
    ) -> Result<Response, AppError> {
        match self
            .api
            .fetch_with_auth(&self.store, method, target, body)
            .await
        {
            Err(AppError::Auth(AuthError::Unauthorized)) => {
                self.send_to_bot().await;
                Err(AuthError::Unauthorized.into())
            }
            other => other,
        }
    }

    /// Exchange the host init payload for a new token pair.
    pub async fn direct_auth(&self, return_url: &str) -> Result<AuthRecord, AppError> {
        let init_data = self
            .host
            .init_data()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| AuthError::DirectAuthFailed("No Telegram WebApp data available".into()))?;

        let response = self.tokens.direct_auth(&init_data, return_url).await?;
        self.store
            .store_tokens(&init_data, response.access_token, response.refresh_token)
    }

    /// Liveness check. Returns whether the session is still alive.
    pub fn check_liveness(&self) -> bool {
        if self.is_ended() {
            return false;
        }

        match self.store.read() {
            Ok(Some(record)) => {
                let remaining = self.store.ttl() - record.age_at(chrono::Utc::now());
                debug!("Session alive, valid for {}", format_duration(remaining));
                true
            }
            Ok(None) => {
                self.handle_error(&AuthError::MissingCredentials);
                false
            }
            Err(e) => {
                self.redirect_for_app_error(&e);
                false
            }
        }
    }

    /// Refresh the token pair, redirecting on failure.
    ///
    /// Returns `None` once the session has ended.
    pub async fn refresh(&self) -> Option<RefreshOutcome> {
        if self.is_ended() {
            return None;
        }

        match self.store.refresh(&self.tokens).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Token refresh failed: {}", e);
                self.redirect_for_app_error(&e);
                None
            }
        }
    }

    /// Send the user to the error page for `err`, dropping the record when the
    /// error ends the session.
    pub fn handle_error(&self, err: &AuthError) -> Redirect {
        if err.requires_reauth() || *err == AuthError::MissingCredentials {
            if let Err(e) = self.store.clear() {
                error!("Failed to clear auth record: {}", e);
            }
        }

        let redirect = Redirect::for_error(err);
        self.redirect(&redirect);
        redirect
    }

    /// Perform a redirect through the navigator.
    ///
    /// Error page and bot redirects end the session.
    pub fn redirect(&self, redirect: &Redirect) {
        if !matches!(redirect, Redirect::Page(_)) {
            self.ended.store(true, Ordering::Release);
        }

        match redirect.to_url(&self.config) {
            Ok(url) => self.navigator.navigate(&url),
            Err(e) => error!("Cannot build redirect URL: {}", e),
        }
    }

    fn redirect_for_app_error(&self, err: &AppError) -> Redirect {
        match err {
            AppError::Auth(e) => self.handle_error(e),
            other => {
                let redirect = Redirect::ErrorPage {
                    message: other.user_message().to_string(),
                };
                self.redirect(&redirect);
                redirect
            }
        }
    }

    async fn send_to_bot(&self) {
        if let Err(e) = self.store.clear() {
            error!("Failed to clear auth record: {}", e);
        }

        match self.bot.resolve(self.api.http()).await {
            Ok(username) => self.redirect(&Redirect::Bot { username }),
            Err(e) => {
                error!("Failed to get bot username: {}", e);
                self.redirect(&Redirect::for_error(&AuthError::Unauthorized));
            }
        }
    }
}
