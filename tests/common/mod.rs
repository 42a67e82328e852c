#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tg_repostbot::config::{self, Config};
use tg_repostbot::db::Pool;
use tg_repostbot::error::AuthError;
use tg_repostbot::retry::{RetryPolicy, Sleeper};
use tg_repostbot::session::{SessionManager, SessionSettings};
use tg_repostbot::telegram::{BotApi, ChannelEntity, HistoryMessage, UserApi, UserConnector};
use tokio::sync::{Mutex, Notify};

pub const FAKE_SESSION: &[u8] = b"fake-session";
pub const CODE_HASH: &str = "hash-1";

pub async fn setup_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// The example config, loaded through the same path as a real file.
pub fn test_config() -> Config {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, config::example()).unwrap();
    config::load(Some(&path)).unwrap()
}

pub fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_secs(30))
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn message(id: i32, date: DateTime<Utc>, text: &str) -> HistoryMessage {
    HistoryMessage {
        id,
        date: Some(date),
        text: Some(text.to_string()),
    }
}

/// Scripted behaviour plus a log of every call made to the user client.
#[derive(Debug, Default)]
pub struct UserState {
    pub authorized: bool,
    pub channel_id: i64,
    /// Newest first, as Telegram returns it.
    pub history: Vec<HistoryMessage>,
    pub missing: HashSet<i32>,
    pub connect_failures: u32,
    pub history_failures: u32,
    pub request_code_error: Option<AuthError>,
    /// Transport failures before `request_code` / `sign_in` go through.
    pub request_code_failures: u32,
    pub sign_in_failures: u32,
    pub sign_in_error: Option<AuthError>,

    pub connects: u32,
    pub sessions_seen: Vec<Option<Vec<u8>>>,
    pub history_walks: u32,
    pub code_requests: Vec<String>,
    pub sign_ins: Vec<(String, String, String)>,
    pub lookups: Vec<i32>,
    pub disconnects: u32,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub state: Arc<Mutex<UserState>>,
}

impl FakeConnector {
    pub fn authorized(history: Vec<HistoryMessage>) -> Self {
        Self::with_state(UserState {
            authorized: true,
            channel_id: 1234567890,
            history,
            ..UserState::default()
        })
    }

    pub fn with_state(state: UserState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

#[async_trait]
impl UserConnector for FakeConnector {
    async fn connect(&self, session: Option<Vec<u8>>) -> Result<Arc<dyn UserApi>> {
        let mut state = self.state.lock().await;
        state.connects += 1;
        state.sessions_seen.push(session);
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            bail!("network unreachable");
        }
        Ok(Arc::new(FakeUser {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeUser {
    state: Arc<Mutex<UserState>>,
}

#[async_trait]
impl UserApi for FakeUser {
    async fn is_authorized(&self) -> Result<bool> {
        Ok(self.state.lock().await.authorized)
    }

    async fn request_code(&self, phone: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.code_requests.push(phone.to_string());
        if state.request_code_failures > 0 {
            state.request_code_failures -= 1;
            bail!("connection reset by peer");
        }
        if let Some(err) = state.request_code_error.clone() {
            return Err(err.into());
        }
        Ok(CODE_HASH.to_string())
    }

    async fn sign_in(&self, phone: &str, code: &str, code_hash: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .sign_ins
            .push((phone.to_string(), code.to_string(), code_hash.to_string()));
        if state.sign_in_failures > 0 {
            state.sign_in_failures -= 1;
            bail!("connection reset by peer");
        }
        if let Some(err) = state.sign_in_error.clone() {
            return Err(err.into());
        }
        state.authorized = true;
        Ok(())
    }

    async fn resolve_channel(&self, channel_ref: &str) -> Result<ChannelEntity> {
        Ok(ChannelEntity {
            id: self.state.lock().await.channel_id,
            reference: channel_ref.to_string(),
        })
    }

    fn iter_history<'a>(
        &'a self,
        _channel: &'a ChannelEntity,
    ) -> BoxStream<'a, Result<HistoryMessage>> {
        stream::once(async move {
            let mut state = self.state.lock().await;
            state.history_walks += 1;
            let mut items: Vec<Result<HistoryMessage>> =
                state.history.iter().cloned().map(Ok).collect();
            if state.history_failures > 0 {
                state.history_failures -= 1;
                items.truncate(1);
                items.push(Err(anyhow!("connection reset while paging history")));
            }
            stream::iter(items)
        })
        .flatten()
        .boxed()
    }

    async fn get_message(
        &self,
        _channel_ref: &str,
        message_id: i32,
    ) -> Result<Option<HistoryMessage>> {
        let mut state = self.state.lock().await;
        state.lookups.push(message_id);
        if state.missing.contains(&message_id) {
            return Ok(None);
        }
        Ok(Some(HistoryMessage {
            id: message_id,
            date: None,
            text: None,
        }))
    }

    fn export_session(&self) -> Vec<u8> {
        FAKE_SESSION.to_vec()
    }

    async fn disconnect(&self) {
        self.state.lock().await.disconnects += 1;
    }
}

#[derive(Debug, Default)]
pub struct BotState {
    pub copies: Vec<(i64, String, i32)>,
    /// Number of upcoming copy calls that fail.
    pub copy_failures: u32,
    pub get_self_fails: bool,
    pub closed: bool,
}

#[derive(Clone, Default)]
pub struct FakeBot {
    pub state: Arc<Mutex<BotState>>,
    /// When set, every copy waits for a permit before completing.
    pub gate: Option<Arc<Notify>>,
    pub copy_started: Arc<Notify>,
}

impl FakeBot {
    pub fn failing(copy_failures: u32) -> Self {
        let bot = Self::default();
        bot.state.try_lock().unwrap().copy_failures = copy_failures;
        bot
    }

    pub async fn copied_ids(&self) -> Vec<i32> {
        self.state.lock().await.copies.iter().map(|c| c.2).collect()
    }
}

#[async_trait]
impl BotApi for FakeBot {
    async fn copy_message(
        &self,
        target_channel_id: i64,
        source_channel: &str,
        message_id: i32,
    ) -> Result<()> {
        self.copy_started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let mut state = self.state.lock().await;
        state
            .copies
            .push((target_channel_id, source_channel.to_string(), message_id));
        if state.copy_failures > 0 {
            state.copy_failures -= 1;
            bail!("Bad Request: timed out");
        }
        Ok(())
    }

    async fn get_self(&self) -> Result<String> {
        if self.state.lock().await.get_self_fails {
            bail!("Unauthorized");
        }
        Ok("repost_bot".to_string())
    }

    async fn close(&self) {
        self.state.lock().await.closed = true;
    }
}

#[derive(Clone, Default)]
pub struct RecordingSleeper {
    pub sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub async fn count(&self) -> usize {
        self.sleeps.lock().await.len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().await.push(duration);
    }
}

pub fn session_manager(
    pool: &Pool,
    connector: &FakeConnector,
    settings: SessionSettings,
    max_attempts: u32,
    sleeper: &RecordingSleeper,
) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        pool.clone(),
        Arc::new(connector.clone()),
        settings,
        policy(max_attempts),
        Arc::new(sleeper.clone()),
    ))
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        phone: "+10000000000".to_string(),
        auth_code: None,
        session_string: None,
    }
}
