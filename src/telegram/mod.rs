//! Seams to the two Telegram clients.
//!
//! The privileged user client (MTProto, `user`) reads full channel history;
//! the bot client (Bot API, `bot`) can only copy messages into channels it
//! administers. Engines depend on these traits so tests can swap in fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;

pub mod bot;
pub mod user;

pub use bot::TeloxideBot;
pub use user::GrammersConnector;

/// A resolved source channel. `id` is the bare MTProto id; `reference` is
/// the handle it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntity {
    pub id: i64,
    pub reference: String,
}

/// The slice of a channel message the backlog cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub id: i32,
    pub date: Option<DateTime<Utc>>,
    /// Text body, or the caption of a media message.
    pub text: Option<String>,
}

/// Builds a connected user client from optional stored session bytes.
#[async_trait]
pub trait UserConnector: Send + Sync {
    async fn connect(&self, session: Option<Vec<u8>>) -> Result<Arc<dyn UserApi>>;
}

#[async_trait]
pub trait UserApi: Send + Sync {
    async fn is_authorized(&self) -> Result<bool>;

    /// Ask Telegram to deliver a login code; returns the code hash that must
    /// accompany the code when signing in.
    async fn request_code(&self, phone: &str) -> Result<String>;

    /// Failures the operator must handle surface as [`crate::error::AuthError`].
    async fn sign_in(&self, phone: &str, code: &str, code_hash: &str) -> Result<()>;

    async fn resolve_channel(&self, channel_ref: &str) -> Result<ChannelEntity>;

    /// Channel history, newest first, fetched lazily page by page.
    fn iter_history<'a>(&'a self, channel: &'a ChannelEntity)
        -> BoxStream<'a, Result<HistoryMessage>>;

    async fn get_message(&self, channel_ref: &str, message_id: i32)
        -> Result<Option<HistoryMessage>>;

    fn export_session(&self) -> Vec<u8>;

    async fn disconnect(&self);
}

#[async_trait]
pub trait BotApi: Send + Sync {
    /// Copy `message_id` from `source_channel` into `target_channel_id` with
    /// content protection disabled.
    async fn copy_message(
        &self,
        target_channel_id: i64,
        source_channel: &str,
        message_id: i32,
    ) -> Result<()>;

    /// Liveness probe; returns the bot's username.
    async fn get_self(&self) -> Result<String>;

    async fn close(&self);
}
