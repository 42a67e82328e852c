//! Lifecycle of the privileged user session: load or create the session,
//! run the phone-code login across restarts, and persist every refresh.
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::db::{self, Pool, PENDING_CODE_HASH_KEY};
use crate::error::{auth_error, AuthError};
use crate::model::{ClientStatus, SessionState};
use crate::retry::{run_with_retry, RetryPolicy, Sleeper};
use crate::telegram::{UserApi, UserConnector};

#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub phone: String,
    pub auth_code: Option<String>,
    /// Base64 session bytes; replaces whatever is stored.
    pub session_string: Option<String>,
}

pub struct SessionManager {
    pool: Pool,
    connector: Arc<dyn UserConnector>,
    settings: SessionSettings,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    client: RwLock<Option<Arc<dyn UserApi>>>,
    state: RwLock<SessionState>,
    starting: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        pool: Pool,
        connector: Arc<dyn UserConnector>,
        settings: SessionSettings,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            pool,
            connector,
            settings,
            retry,
            sleeper,
            client: RwLock::new(None),
            state: RwLock::new(SessionState::Unauthenticated),
            starting: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }

    /// Connect and authorize. Transport failures of every step are retried;
    /// login failures are returned at once as [`AuthError`]s.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<()> {
        let _starting = self.starting.lock().await;
        if self.client.read().await.is_some() {
            return Ok(());
        }

        let session = self.initial_session().await?;
        let (client, authorized) =
            run_with_retry(&self.retry, self.sleeper.as_ref(), "user client connect", |_| {
                let session = session.clone();
                async move {
                    let client = self.connector.connect(session).await?;
                    match client.is_authorized().await {
                        Ok(authorized) => Ok((client, authorized)),
                        Err(err) => {
                            client.disconnect().await;
                            Err(err)
                        }
                    }
                }
            })
            .await?;

        if !authorized {
            self.set_state(SessionState::ConnectedUnauthorized).await;
            if let Err(err) = self.authorize(client.as_ref()).await {
                if self.state().await != SessionState::AwaitingCode {
                    self.set_state(SessionState::Failed).await;
                }
                client.disconnect().await;
                return Err(err);
            }
        }

        db::save_session_bytes(&self.pool, &client.export_session()).await?;
        *self.client.write().await = Some(client);
        self.set_state(SessionState::Authenticated).await;
        info!("user client connected");
        Ok(())
    }

    async fn initial_session(&self) -> Result<Option<Vec<u8>>> {
        if let Some(encoded) = &self.settings.session_string {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .context("supplied session string is not valid base64")?;
            info!("using externally supplied session");
            return Ok(Some(bytes));
        }
        db::load_session_bytes(&self.pool).await
    }

    async fn authorize(&self, client: &dyn UserApi) -> Result<()> {
        let phone = &self.settings.phone;
        let pending = db::get_config(&self.pool, PENDING_CODE_HASH_KEY)
            .await?
            .filter(|hash| !hash.is_empty());

        let Some(code_hash) = pending else {
            let code_hash =
                run_with_retry(&self.retry, self.sleeper.as_ref(), "login code request", |_| {
                    client.request_code(phone)
                })
                .await?;
            db::set_config(&self.pool, PENDING_CODE_HASH_KEY, &code_hash).await?;
            // The code is bound to this session's auth key.
            db::save_session_bytes(&self.pool, &client.export_session()).await?;
            self.set_state(SessionState::AwaitingCode).await;
            warn!(phone = %phone, "login code requested; supply it and restart");
            return Err(AuthError::CodeMissing {
                phone: phone.clone(),
            }
            .into());
        };

        let Some(code) = self.settings.auth_code.as_deref() else {
            self.set_state(SessionState::AwaitingCode).await;
            return Err(AuthError::CodeMissing {
                phone: phone.clone(),
            }
            .into());
        };

        // A retried sign-in whose first attempt reached the server comes
        // back as CodeInvalid or CodeExpired, which clears the hash below.
        let signed_in = run_with_retry(&self.retry, self.sleeper.as_ref(), "sign in", |_| {
            client.sign_in(phone, code, &code_hash)
        })
        .await;
        match signed_in {
            Ok(()) => {
                db::set_config(&self.pool, PENDING_CODE_HASH_KEY, "").await?;
                info!("user signed in");
                Ok(())
            }
            Err(err) => {
                if auth_error(&err).is_some_and(AuthError::invalidates_pending_code) {
                    db::set_config(&self.pool, PENDING_CODE_HASH_KEY, "").await?;
                    warn!(?err, "sign-in rejected; pending code discarded");
                }
                Err(err)
            }
        }
    }

    /// The connected client, connecting first if needed.
    pub async fn client(&self) -> Result<Arc<dyn UserApi>> {
        if let Some(client) = self.connected_client().await {
            return Ok(client);
        }
        self.start().await?;
        self.connected_client()
            .await
            .ok_or_else(|| anyhow!("user client is not connected"))
    }

    /// The client if a previous `start` succeeded; never connects.
    pub async fn connected_client(&self) -> Option<Arc<dyn UserApi>> {
        self.client.read().await.clone()
    }

    pub async fn persist_session(&self) -> Result<()> {
        if let Some(client) = self.connected_client().await {
            db::save_session_bytes(&self.pool, &client.export_session()).await?;
        }
        Ok(())
    }

    pub async fn status(&self) -> ClientStatus {
        let Some(client) = self.connected_client().await else {
            return ClientStatus::Disconnected;
        };
        match client.is_authorized().await {
            Ok(true) => ClientStatus::Connected,
            Ok(false) => ClientStatus::Unauthorized,
            Err(err) => {
                warn!(?err, "user client status check failed");
                ClientStatus::Error
            }
        }
    }

    pub async fn stop(&self) {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            if let Err(err) = db::save_session_bytes(&self.pool, &client.export_session()).await {
                warn!(?err, "failed to persist session on shutdown");
            }
            client.disconnect().await;
        }
        self.set_state(SessionState::Unauthenticated).await;
    }
}
