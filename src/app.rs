//! Wiring of the engines and the lifecycle hooks the outer surfaces call.
use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool, INITIALIZED_AT_KEY};
use crate::health::{self, HealthReport};
use crate::ingest::Ingestor;
use crate::repost::Reposter;
use crate::retry::Sleeper;
use crate::session::{SessionManager, SessionSettings};
use crate::telegram::{BotApi, UserConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Published(i32),
    /// Backlog is empty.
    Skipped,
    /// Another publish is still running.
    Busy,
}

pub struct App {
    pool: Pool,
    session: Arc<SessionManager>,
    bot: Arc<dyn BotApi>,
    ingestor: Ingestor,
    reposter: Reposter,
    window: (DateTime<Tz>, DateTime<Tz>),
    repost_gate: Mutex<()>,
}

impl App {
    pub fn new(
        cfg: &Config,
        pool: Pool,
        connector: Arc<dyn UserConnector>,
        bot: Arc<dyn BotApi>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let retry = cfg.retry_policy();
        let timezone = cfg.timezone()?;
        let window = cfg.window()?;
        let tg = &cfg.telegram;

        let session = Arc::new(SessionManager::new(
            pool.clone(),
            connector,
            SessionSettings {
                phone: tg.phone.clone(),
                auth_code: tg.auth_code.clone(),
                session_string: tg.session_string.clone(),
            },
            retry,
            Arc::clone(&sleeper),
        ));
        let ingestor = Ingestor::new(
            pool.clone(),
            Arc::clone(&session),
            tg.source_channel.clone(),
            timezone,
            retry,
            Arc::clone(&sleeper),
        );
        let reposter = Reposter::new(
            pool.clone(),
            Arc::clone(&session),
            Arc::clone(&bot),
            tg.source_channel.clone(),
            tg.target_channel_id,
            retry,
            sleeper,
        );

        Ok(Self {
            pool,
            session,
            bot,
            ingestor,
            reposter,
            window,
            repost_gate: Mutex::new(()),
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Connect the user client and fill the backlog on first run. Any
    /// error here must abort startup.
    #[instrument(skip_all)]
    pub async fn initialize(&self) -> Result<()> {
        self.session.start().await?;

        let total = db::count_total(&self.pool).await?;
        if total == 0 {
            let (start, end) = self.window;
            info!(%start, %end, "backlog empty; fetching channel history");
            self.ingestor.fetch_posts(start, end).await?;
            // Stamped once, when the backlog is first filled.
            db::set_config(&self.pool, INITIALIZED_AT_KEY, &Utc::now().to_rfc3339()).await?;
        } else {
            info!(total, "backlog already populated; skipping ingestion");
        }
        Ok(())
    }

    pub async fn trigger_repost(&self) -> Result<TriggerOutcome> {
        let Ok(_gate) = self.repost_gate.try_lock() else {
            warn!("repost already in progress");
            return Ok(TriggerOutcome::Busy);
        };
        Ok(match self.reposter.repost_once().await? {
            Some(entry) => TriggerOutcome::Published(entry.message_id),
            None => TriggerOutcome::Skipped,
        })
    }

    pub async fn health(&self) -> HealthReport {
        health::collect(&self.pool, &self.session, self.bot.as_ref()).await
    }

    pub async fn shutdown(&self) {
        self.session.stop().await;
        self.bot.close().await;
        self.pool.close().await;
        info!("shutdown complete");
    }
}
