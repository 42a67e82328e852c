use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::payloads::CopyMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{MessageId, Recipient};
use tracing::{error, info};

use super::BotApi;

/// Bot API client used only to copy posts into the target channel.
#[derive(Clone)]
pub struct TeloxideBot {
    bot: Bot,
}

impl TeloxideBot {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }
}

/// The configured source may be a username or a numeric dialog id.
pub fn source_recipient(source: &str) -> Recipient {
    let source = source.trim().trim_start_matches('@');
    match source.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(format!("@{source}")),
    }
}

#[async_trait]
impl BotApi for TeloxideBot {
    async fn copy_message(
        &self,
        target_channel_id: i64,
        source_channel: &str,
        message_id: i32,
    ) -> Result<()> {
        let res = self
            .bot
            .copy_message(
                ChatId(target_channel_id),
                source_recipient(source_channel),
                MessageId(message_id),
            )
            .protect_content(false)
            .await;
        match res {
            Ok(_) => {
                info!(message_id, target_channel_id, "post copied");
                Ok(())
            }
            Err(err) => {
                error!(?err, message_id, "failed to copy message");
                Err(err).with_context(|| format!("copy of message {message_id} failed"))
            }
        }
    }

    async fn get_self(&self) -> Result<String> {
        let me = self.bot.get_me().await.context("getMe failed")?;
        Ok(me.username().to_string())
    }

    async fn close(&self) {
        // The HTTP client holds no server-side state; calling the Bot API
        // `close` method would log the bot out for ten minutes.
        info!("bot client released");
    }
}
