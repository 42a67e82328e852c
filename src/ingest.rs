//! Initial fill of the backlog from the source channel's history.
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::channel::normalize_channel_id;
use crate::db::{self, Pool};
use crate::retry::{run_with_retry, RetryPolicy, Sleeper};
use crate::session::SessionManager;

pub const PREVIEW_CHARS: usize = 500;

/// First [`PREVIEW_CHARS`] characters of a post body.
pub fn content_preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

pub struct Ingestor {
    pool: Pool,
    session: Arc<SessionManager>,
    source_channel: String,
    timezone: Tz,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Ingestor {
    pub fn new(
        pool: Pool,
        session: Arc<SessionManager>,
        source_channel: impl Into<String>,
        timezone: Tz,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            pool,
            session,
            source_channel: source_channel.into(),
            timezone,
            retry,
            sleeper,
        }
    }

    /// Save every post whose local calendar day lies in `[start, end]`.
    /// A failed walk restarts from the newest message; upserts make the
    /// rescan harmless.
    #[instrument(skip_all)]
    pub async fn fetch_posts(&self, start: DateTime<Tz>, end: DateTime<Tz>) -> Result<usize> {
        let start_day = start.with_timezone(&self.timezone).date_naive();
        let end_day = end.with_timezone(&self.timezone).date_naive();
        if start_day > end_day {
            bail!("ingest window starts {start_day} after it ends {end_day}");
        }

        let saved = run_with_retry(&self.retry, self.sleeper.as_ref(), "fetch posts", |_| {
            self.walk(start_day, end_day)
        })
        .await?;
        info!(saved, %start_day, %end_day, "messages fetched");
        Ok(saved)
    }

    async fn walk(&self, start_day: NaiveDate, end_day: NaiveDate) -> Result<usize> {
        let client = self.session.client().await?;
        let channel = client.resolve_channel(&self.source_channel).await?;
        let channel_id = normalize_channel_id(channel.id);

        let mut saved = 0;
        let mut history = client.iter_history(&channel);
        while let Some(message) = history.try_next().await? {
            let Some(date) = message.date else {
                continue;
            };
            let local = date.with_timezone(&self.timezone);
            let day = local.date_naive();
            // History is newest first: nothing older can be in range.
            if day < start_day {
                break;
            }
            if day > end_day {
                continue;
            }

            let preview = content_preview(message.text.as_deref().unwrap_or_default());
            db::upsert_post(
                &self.pool,
                message.id,
                channel_id,
                local.naive_local(),
                Some(preview.as_str()),
            )
            .await?;
            saved += 1;
        }
        drop(history);

        self.session.persist_session().await?;
        debug!(saved, channel_id, "history walk finished");
        Ok(saved)
    }
}
