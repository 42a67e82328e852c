use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::BacklogEntry;
use crate::retry::{run_with_retry, RetryPolicy, Sleeper};
use crate::session::SessionManager;
use crate::telegram::BotApi;

/// Publishes one random unpublished backlog entry per call.
pub struct Reposter {
    pool: Pool,
    session: Arc<SessionManager>,
    bot: Arc<dyn BotApi>,
    source_channel: String,
    target_channel_id: i64,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Reposter {
    pub fn new(
        pool: Pool,
        session: Arc<SessionManager>,
        bot: Arc<dyn BotApi>,
        source_channel: impl Into<String>,
        target_channel_id: i64,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            pool,
            session,
            bot,
            source_channel: source_channel.into(),
            target_channel_id,
            retry,
            sleeper,
        }
    }

    /// Returns the published entry, or `None` when the backlog is drained.
    /// On failure the entry stays unpublished and eligible for later picks.
    #[instrument(skip_all)]
    pub async fn repost_once(&self) -> Result<Option<BacklogEntry>> {
        let Some(entry) = db::pick_random_unpublished(&self.pool).await? else {
            info!("no unreposted posts available");
            return Ok(None);
        };
        let message_id = entry.message_id;

        let res = run_with_retry(&self.retry, self.sleeper.as_ref(), "repost", |attempt| {
            debug!(message_id, attempt, "repost attempt");
            self.copy_and_mark(message_id)
        })
        .await;
        if let Err(err) = res {
            error!(?err, message_id, "repost failed; entry stays eligible");
            return Err(err);
        }

        info!(message_id, target = self.target_channel_id, "post reposted");
        let published = db::fetch_post(&self.pool, message_id).await?.unwrap_or(entry);
        Ok(Some(published))
    }

    async fn copy_and_mark(&self, message_id: i32) -> Result<()> {
        // Existence is only checked when the user client is already up.
        if let Some(client) = self.session.connected_client().await {
            if client
                .get_message(&self.source_channel, message_id)
                .await?
                .is_none()
            {
                warn!(message_id, "message gone from source channel; retiring entry");
                db::mark_published(&self.pool, message_id, None).await?;
                return Ok(());
            }
        }

        self.bot
            .copy_message(self.target_channel_id, &self.source_channel, message_id)
            .await?;
        db::mark_published(&self.pool, message_id, None).await?;
        Ok(())
    }
}
