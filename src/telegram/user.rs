use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use grammers_client::grammers_tl_types as tl;
use grammers_client::session::defs::{PeerAuth, PeerId, PeerRef};
use grammers_client::session::storages::TlSession;
use grammers_client::types::{Message, Peer};
use grammers_client::Client;
use grammers_mtsender::{InvocationError, SenderPool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::{ChannelEntity, HistoryMessage, UserApi, UserConnector};
use crate::error::AuthError;

/// Builds MTProto user clients from a stored session.
pub struct GrammersConnector {
    api_id: i32,
    api_hash: String,
}

impl GrammersConnector {
    pub fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
        }
    }
}

#[async_trait]
impl UserConnector for GrammersConnector {
    async fn connect(&self, session: Option<Vec<u8>>) -> Result<Arc<dyn UserApi>> {
        let session = match session {
            Some(bytes) => {
                TlSession::load(&bytes).map_err(|e| anyhow!("session load failed: {e}"))?
            }
            None => TlSession::new(),
        };
        let session = Arc::new(session);

        let pool = SenderPool::new(Arc::clone(&session), self.api_id);
        let client = Client::new(&pool);
        let SenderPool { runner, .. } = pool;
        let runner = tokio::spawn(runner.run()).abort_handle();
        debug!("mtproto sender started");

        Ok(Arc::new(GrammersUser {
            client,
            session,
            runner,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            peers: Mutex::new(HashMap::new()),
        }))
    }
}

struct GrammersUser {
    client: Client,
    session: Arc<TlSession>,
    runner: AbortHandle,
    api_id: i32,
    api_hash: String,
    peers: Mutex<HashMap<String, Peer>>,
}

impl Drop for GrammersUser {
    fn drop(&mut self) {
        self.runner.abort();
    }
}

/// Bare channel id for a Bot API style `-100…` dialog id.
fn bare_channel_id(dialog_id: i64) -> Option<i64> {
    (dialog_id <= -1_000_000_000_001).then(|| -dialog_id - 1_000_000_000_000)
}

fn history_message(message: &Message) -> HistoryMessage {
    let text = message.text();
    HistoryMessage {
        id: message.id(),
        date: Some(message.date()),
        text: (!text.is_empty()).then(|| text.to_string()),
    }
}

/// Translate login RPC errors into operator-facing [`AuthError`]s.
fn auth_failure(err: InvocationError) -> anyhow::Error {
    if let InvocationError::Rpc(rpc) = &err {
        let mapped = match rpc.name.as_str() {
            "PHONE_CODE_INVALID" | "PHONE_CODE_EMPTY" => Some(AuthError::CodeInvalid),
            "PHONE_CODE_EXPIRED" => Some(AuthError::CodeExpired),
            "SESSION_PASSWORD_NEEDED" => Some(AuthError::SecondFactorRequired),
            "FLOOD_WAIT" => Some(AuthError::RateLimited {
                seconds: rpc.value.unwrap_or(0),
            }),
            _ => None,
        };
        if let Some(auth) = mapped {
            return auth.into();
        }
    }
    anyhow::Error::new(err).context("telegram login request failed")
}

impl GrammersUser {
    async fn resolve_peer(&self, channel_ref: &str) -> Result<Peer> {
        let mut peers = self.peers.lock().await;
        if let Some(peer) = peers.get(channel_ref) {
            return Ok(peer.clone());
        }

        let reference = channel_ref.trim().trim_start_matches('@');
        let peer = match reference.parse::<i64>().ok().and_then(bare_channel_id) {
            Some(bare) => self
                .client
                .resolve_peer(PeerRef {
                    id: PeerId::channel(bare),
                    auth: PeerAuth::default(),
                })
                .await
                .with_context(|| format!("failed to resolve channel {channel_ref}"))?,
            None => self
                .client
                .resolve_username(reference)
                .await
                .with_context(|| format!("failed to resolve channel {channel_ref}"))?
                .ok_or_else(|| anyhow!("channel not found: {channel_ref}"))?,
        };
        peers.insert(channel_ref.to_string(), peer.clone());
        Ok(peer)
    }
}

#[async_trait]
impl UserApi for GrammersUser {
    async fn is_authorized(&self) -> Result<bool> {
        self.client
            .is_authorized()
            .await
            .context("authorization check failed")
    }

    async fn request_code(&self, phone: &str) -> Result<String> {
        let request = tl::functions::auth::SendCode {
            phone_number: phone.to_string(),
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            settings: tl::enums::CodeSettings::Settings(tl::types::CodeSettings {
                allow_flashcall: false,
                current_number: false,
                allow_app_hash: false,
                allow_missed_call: false,
                allow_firebase: false,
                unknown_number: false,
                logout_tokens: None,
                token: None,
                app_sandbox: None,
            }),
        };
        match self.client.invoke(&request).await.map_err(auth_failure)? {
            tl::enums::auth::SentCode::Code(sent) => {
                info!("login code requested");
                Ok(sent.phone_code_hash)
            }
            other => bail!("unexpected response to login code request: {other:?}"),
        }
    }

    async fn sign_in(&self, phone: &str, code: &str, code_hash: &str) -> Result<()> {
        let request = tl::functions::auth::SignIn {
            phone_number: phone.to_string(),
            phone_code_hash: code_hash.to_string(),
            phone_code: Some(code.to_string()),
            email_verification: None,
        };
        match self.client.invoke(&request).await.map_err(auth_failure)? {
            tl::enums::auth::Authorization::Authorization(_) => Ok(()),
            tl::enums::auth::Authorization::SignUpRequired(_) => Err(AuthError::SignUpRequired {
                phone: phone.to_string(),
            }
            .into()),
        }
    }

    async fn resolve_channel(&self, channel_ref: &str) -> Result<ChannelEntity> {
        let peer = self.resolve_peer(channel_ref).await?;
        Ok(ChannelEntity {
            id: peer.id().bare_id(),
            reference: channel_ref.to_string(),
        })
    }

    fn iter_history<'a>(
        &'a self,
        channel: &'a ChannelEntity,
    ) -> BoxStream<'a, Result<HistoryMessage>> {
        stream::once(self.resolve_peer(&channel.reference))
            .map_ok(move |peer| {
                stream::try_unfold(self.client.iter_messages(&peer), |mut iter| async move {
                    let next = iter.next().await.context("failed to fetch history page")?;
                    Ok::<_, anyhow::Error>(next.map(|m| (history_message(&m), iter)))
                })
            })
            .try_flatten()
            .boxed()
    }

    async fn get_message(
        &self,
        channel_ref: &str,
        message_id: i32,
    ) -> Result<Option<HistoryMessage>> {
        let peer = self.resolve_peer(channel_ref).await?;
        let mut found = self
            .client
            .get_messages_by_id(&peer, &[message_id])
            .await
            .with_context(|| format!("failed to look up message {message_id}"))?;
        Ok(found.pop().flatten().map(|m| history_message(&m)))
    }

    fn export_session(&self) -> Vec<u8> {
        self.session.save().to_vec()
    }

    async fn disconnect(&self) {
        self.runner.abort();
        info!("user client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_api_channel_ids_map_to_bare_ids() {
        assert_eq!(bare_channel_id(-1001234567890), Some(1234567890));
        assert_eq!(bare_channel_id(-1000000000001), Some(1));
    }

    #[test]
    fn non_channel_ids_are_rejected() {
        assert_eq!(bare_channel_id(-123456), None);
        assert_eq!(bare_channel_id(42), None);
    }
}
