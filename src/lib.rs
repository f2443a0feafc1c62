//! Session and token lifecycle management for Telegram Mini Apps.
//!
//! Persists one auth record, attaches it to outgoing links and requests,
//! refreshes it in the background, and routes the user to an error page or
//! back to the bot when the session cannot continue.

#![deny(clippy::all)]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod host;
pub mod links;
pub mod navigation;
pub mod session;
pub mod storage;

pub use auth::{AuthRecord, BackgroundTasks, LaunchParams, RefreshOutcome, TokenStore};
pub use config::Config;
pub use error::{ApiError, AppError, AuthError, StorageError};
pub use session::{InitOutcome, Session};
