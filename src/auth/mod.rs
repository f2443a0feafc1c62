//! Telegram WebApp authentication module.
//!
//! Provides the persisted auth record, the token store with sliding expiry,
//! the backend token client, and the background refresh tasks.

pub mod record;
pub mod scheduler;
pub mod store;
pub mod token_client;

pub use record::{AuthRecord, LaunchParams};
pub use scheduler::BackgroundTasks;
pub use store::{RefreshOutcome, TokenStore};
pub use token_client::{TokenClient, TokenResponse};
