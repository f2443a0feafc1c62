//! Backend API access.
//!
//! Provides the authenticated request client and the bot username lookup.

pub mod bot_info;
pub mod client;

pub use bot_info::BotDirectory;
pub use client::ApiClient;
