use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::db::{self, Pool};
use crate::model::ClientStatus;
use crate::session::SessionManager;
use crate::telegram::BotApi;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Connected,
    Error,
}

/// Point-in-time status snapshot. Each field is gathered independently.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub database: DatabaseStatus,
    pub telegram_user_api: ClientStatus,
    pub telegram_bot_api: ClientStatus,
    pub unpublished_posts: Option<i64>,
    pub last_repost: Option<DateTime<Utc>>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database == DatabaseStatus::Connected
            && self.telegram_user_api != ClientStatus::Error
            && self.telegram_bot_api != ClientStatus::Error
    }
}

pub async fn bot_status(bot: &dyn BotApi) -> ClientStatus {
    match bot.get_self().await {
        Ok(_) => ClientStatus::Connected,
        Err(err) => {
            warn!(?err, "bot status check failed");
            ClientStatus::Error
        }
    }
}

pub async fn collect(pool: &Pool, session: &SessionManager, bot: &dyn BotApi) -> HealthReport {
    let mut database = DatabaseStatus::Connected;

    let unpublished_posts = match db::count_unpublished(pool).await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(?err, "unpublished count failed");
            database = DatabaseStatus::Error;
            None
        }
    };
    let last_repost = match db::latest_published_at(pool).await {
        Ok(at) => at,
        Err(err) => {
            warn!(?err, "last repost lookup failed");
            database = DatabaseStatus::Error;
            None
        }
    };

    HealthReport {
        database,
        telegram_user_api: session.status().await,
        telegram_bot_api: bot_status(bot).await,
        unpublished_posts,
        last_repost,
    }
}
