//! Error types for the twa-auth library.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task stopped: {0}")]
    TaskStopped(String),
}

/// Session lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authentication parameters")]
    MissingCredentials,

    #[error("Session expired")]
    Expired,

    #[error("Stored auth record is corrupt: {0}")]
    CorruptRecord(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Unauthorized (401): session rejected by server")]
    Unauthorized,

    #[error("Direct authentication failed: {0}")]
    DirectAuthFailed(String),
}

/// Local storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read storage: {0}")]
    ReadFailed(String),

    #[error("Failed to write storage: {0}")]
    WriteFailed(String),

    #[error("Failed to delete from storage: {0}")]
    DeleteFailed(String),
}

/// Backend API errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Failed to look up bot username: {0}")]
    BotLookupFailed(String),
}

impl AuthError {
    /// Message shown on the error page.
    pub fn user_message(&self) -> &str {
        match self {
            Self::MissingCredentials => "Missing authentication parameters",
            Self::Expired => "Session expired. Please reauthorize through the bot.",
            Self::CorruptRecord(_) => "Saved session was unreadable. Please sign in again.",
            Self::RefreshFailed(_) => "Could not refresh your session. Please try again.",
            Self::Unauthorized => "Authentication required. Please return to the bot.",
            Self::DirectAuthFailed(_) => "Authentication failed",
        }
    }

    /// Returns true if the stored record must be dropped.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::Unauthorized | Self::CorruptRecord(_)
        )
    }
}

impl AppError {
    /// Returns a user-friendly message for display on the error page.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(e) => e.user_message(),
            Self::Storage(_) => "Failed to access saved session.",
            Self::Api(ApiError::BotLookupFailed(_)) => {
                "Authentication required. Please return to the bot."
            }
            Self::Api(_) => "Request failed. Please try again.",
            Self::Network(_) => "Network error. Check your connection.",
            Self::Config(_) => "Configuration error. Please check settings.",
            Self::Io(_) | Self::TaskStopped(_) => "An error occurred. Please try again.",
        }
    }

    /// Returns true if this error should end the session.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth(e) if e.requires_reauth())
    }
}
