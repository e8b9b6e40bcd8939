//! Gateway facade: the registry of account sessions and the entry point used
//! by the HTTP surface and the binary.

use crate::bridge::OutboundMessage;
use crate::broadcast::{EventBroadcaster, Subscription};
use crate::config::GatewayConfig;
use crate::pairing::QrChallenge;
use crate::session::{Session, SessionContext, StatusSnapshot};
use crate::store::Store;
use crate::transport::Connector;
use crate::types::AccountId;
use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// Multi-account gateway.
///
/// Sessions are created on first use and kept afterwards, so a stopped
/// account can be started again and lifecycle calls for one account always
/// go through the same session.
pub struct Gateway {
    ctx: Arc<SessionContext>,
    sessions: DashMap<AccountId, Arc<Session>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, store: Store, connector: Arc<dyn Connector>) -> Self {
        let broadcaster = Arc::new(EventBroadcaster::new(config.subscriber_queue));
        Self {
            ctx: Arc::new(SessionContext {
                store,
                connector,
                broadcaster,
                config,
            }),
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.ctx.config
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.ctx.broadcaster
    }

    fn session(&self, account: &AccountId) -> Arc<Session> {
        self.sessions
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Session::new(account.clone(), Arc::clone(&self.ctx))))
            .clone()
    }

    /// Start connecting `account`. Idempotent.
    pub async fn start(&self, account: &AccountId) -> Result<()> {
        tracing::info!(account = %account, "starting session");
        self.session(account).start().await
    }

    /// Stop `account` and close its link. Idempotent.
    pub async fn stop(&self, account: &AccountId) -> Result<()> {
        let Some(session) = self.sessions.get(account).map(|s| Arc::clone(s.value())) else {
            return Ok(());
        };
        tracing::info!(account = %account, "stopping session");
        session.stop().await
    }

    /// Send a text message from `account`. `to` is a phone number or a JID.
    pub async fn send(&self, account: &AccountId, to: &str, text: &str) -> Result<OutboundMessage> {
        let session = self
            .sessions
            .get(account)
            .map(|s| Arc::clone(s.value()))
            .ok_or(crate::Error::SessionNotConnected)?;
        session.send(to, text).await
    }

    /// Ask for a pairing QR code; see [`Session::request_qr`].
    pub async fn request_qr(&self, account: &AccountId) -> Result<()> {
        self.session(account).request_qr().await
    }

    /// Forget the credential of `account` and stop it.
    pub async fn logout(&self, account: &AccountId) -> Result<()> {
        tracing::info!(account = %account, "logging out");
        self.session(account).logout().await
    }

    pub fn get_status(&self, account: &AccountId) -> StatusSnapshot {
        self.ctx.broadcaster.current_status(account)
    }

    pub fn get_qr(&self, account: &AccountId) -> Option<QrChallenge> {
        self.ctx.broadcaster.current_qr(account)
    }

    /// Subscribe to events of every account, or of one.
    pub fn subscribe(&self, account: Option<AccountId>) -> Subscription {
        self.ctx.broadcaster.subscribe(account)
    }

    /// Accounts with a session, sorted.
    pub fn accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<_> = self.sessions.iter().map(|e| e.key().clone()).collect();
        accounts.sort();
        accounts
    }

    /// Stop every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for session in sessions {
            if let Err(e) = session.stop().await {
                tracing::warn!(account = %session.account_id(), error = %e, "stop failed during shutdown");
            }
        }
        tracing::info!("gateway shut down");
    }
}
