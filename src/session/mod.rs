//! Per-account connection session.
//!
//! Each running session is one tokio task that owns the link to the network
//! and is the only writer of the account's [`AccountSession`]. Lifecycle calls
//! (`start`, `stop`, `request_qr`, `logout`) are serialized by the session's
//! control lock and take effect only after the previous task has finished.

mod state;

pub use state::{AccountSession, ConnectedUser, SessionState, StatusSnapshot};

use crate::bridge::{self, MessageBridge, OutboundMessage};
use crate::broadcast::EventBroadcaster;
use crate::config::GatewayConfig;
use crate::error::{ConnectionError, Error, PairingError};
use crate::events::GatewayEvent;
use crate::pairing::{generate_pairing_keys, qr_payload, Device, PairingKeys, QrChallenge};
use crate::store::{Credential, Store};
use crate::transport::{Connector, Transport, TransportEvent};
use crate::types::AccountId;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Collaborators shared by every session of a gateway.
pub(crate) struct SessionContext {
    pub store: Store,
    pub connector: Arc<dyn Connector>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub config: GatewayConfig,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// How a link ended.
enum LinkEnd {
    /// Transient failure; the reconnect policy decides what happens next.
    Dropped(String),
    /// The network invalidated the credential.
    LoggedOut(String),
    /// Nothing a retry can fix.
    Fatal(Error),
}

/// One account's connection lifecycle.
pub struct Session {
    shared: Arc<Shared>,
    control: Mutex<Option<Running>>,
}

impl Session {
    pub(crate) fn new(account: AccountId, ctx: Arc<SessionContext>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(AccountSession::new(account.clone())),
                transport: RwLock::new(None),
                account,
                ctx,
            }),
            control: Mutex::new(None),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.shared.account
    }

    pub async fn state(&self) -> SessionState {
        self.shared.state.read().await.state
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.shared.state.read().await.status()
    }

    /// Begin connecting. A session that is already running is left alone.
    pub async fn start(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        match self.state().await {
            SessionState::Disconnected | SessionState::LoggedOut => {
                self.spawn_locked(&mut control).await;
            }
            state => {
                tracing::debug!(account = %self.shared.account, %state, "start ignored, session already running");
            }
        }
        Ok(())
    }

    /// Cancel the session task, close the link and settle in `disconnected`.
    /// Returns once no retry loop for the account remains.
    pub async fn stop(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        self.halt_locked(&mut control).await;
        if self.state().await != SessionState::Disconnected {
            self.shared.transition(|s| s.enter(SessionState::Disconnected)).await;
        }
        Ok(())
    }

    /// Ask for a pairing QR code.
    ///
    /// An idle session is started; a session already showing a QR code is
    /// reconnected so the network issues a fresh one.
    pub async fn request_qr(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        match self.state().await {
            SessionState::Disconnected | SessionState::LoggedOut => {
                self.spawn_locked(&mut control).await;
                Ok(())
            }
            SessionState::QrPending => {
                tracing::info!(account = %self.shared.account, "restarting link for a fresh QR code");
                self.halt_locked(&mut control).await;
                self.spawn_locked(&mut control).await;
                Ok(())
            }
            state => Err(Error::InvalidStateForQr(state)),
        }
    }

    /// Send a text message. Fails fast with [`Error::SessionNotConnected`]
    /// unless the account is connected; nothing is queued.
    pub async fn send(&self, to: &str, text: &str) -> Result<OutboundMessage> {
        let transport = {
            let state = self.shared.state.read().await;
            if state.state != SessionState::Connected {
                return Err(Error::SessionNotConnected);
            }
            self.shared.transport.read().await.clone()
        };
        let transport = transport.ok_or(Error::SessionNotConnected)?;

        let account = &self.shared.account;
        let result = bridge::send_outbound(transport.as_ref(), account, to, text).await;
        if let Err(e) = &result {
            tracing::warn!(account = %account, to, error = %e, "send failed");
        }
        self.shared
            .ctx
            .broadcaster
            .publish(GatewayEvent::message_sent(account.clone(), to, &result));
        result
    }

    /// Stop the session and forget its credential; the account needs a new
    /// QR pairing afterwards.
    pub async fn logout(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        self.halt_locked(&mut control).await;
        if let Err(e) = self.shared.ctx.store.clear(&self.shared.account).await {
            // The link is already gone; leave a state `start` can resume from.
            self.shared.fail("logout", &e).await;
            return Err(e);
        }
        self.shared.logged_out("logged out by request").await;
        Ok(())
    }

    async fn spawn_locked(&self, control: &mut Option<Running>) {
        self.halt_locked(control).await;
        self.shared.transition(|s| s.enter(SessionState::Connecting)).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&self.shared), cancel.clone()));
        *control = Some(Running { cancel, task });
    }

    async fn halt_locked(&self, control: &mut Option<Running>) {
        if let Some(running) = control.take() {
            running.cancel.cancel();
            if let Err(e) = running.task.await {
                tracing::error!(account = %self.shared.account, error = %e, "session task failed");
            }
        }
        self.shared.close_transport().await;
    }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(account = %shared.account, "session cancelled");
        }
        _ = shared.drive() => {}
    }
    shared.close_transport().await;
}

struct Shared {
    account: AccountId,
    ctx: Arc<SessionContext>,
    state: RwLock<AccountSession>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl Shared {
    /// Connect, pump the link, and apply the reconnect policy until the
    /// session settles in a terminal state.
    async fn drive(&self) {
        let mut credential = match self.load_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                self.fail("load credential", &e).await;
                return;
            }
        };
        let config = &self.ctx.config;
        let mut bridge = MessageBridge::new(self.account.clone(), config.dedup_window, config.dedup_bucket);

        loop {
            match self.connect_once(&mut credential, &mut bridge).await {
                LinkEnd::Dropped(reason) => {
                    let attempt = self.state.read().await.reconnect_attempt + 1;
                    if attempt > config.reconnect.max_attempts {
                        tracing::warn!(account = %self.account, %reason, "reconnect attempts exhausted");
                        let e = Error::Other(anyhow::anyhow!(
                            "gave up after {} reconnect attempts: {reason}",
                            config.reconnect.max_attempts
                        ));
                        self.fail("reconnect", &e).await;
                        return;
                    }
                    let delay = config.reconnect.delay(attempt);
                    tracing::info!(
                        account = %self.account,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "link dropped, reconnecting"
                    );
                    self.transition(|s| s.reconnecting(attempt)).await;
                    tokio::time::sleep(delay).await;
                }
                LinkEnd::LoggedOut(reason) => {
                    tracing::warn!(account = %self.account, %reason, "logged out by the network");
                    if let Err(e) = self.ctx.store.clear(&self.account).await {
                        self.publish_error("clear credential", &e);
                    }
                    self.logged_out(&reason).await;
                    return;
                }
                LinkEnd::Fatal(e) => {
                    tracing::error!(account = %self.account, error = %e, "session failed");
                    self.fail("connection", &e).await;
                    return;
                }
            }
        }
    }

    async fn load_credential(&self) -> Result<Option<Credential>> {
        let Some(credential) = self.ctx.store.load(&self.account).await? else {
            tracing::info!(account = %self.account, "no stored credential, pairing required");
            return Ok(None);
        };
        let device = Device::decode(&credential)?;
        tracing::info!(account = %self.account, user = %device.id, "resuming stored session");
        Ok(Some(credential))
    }

    async fn connect_once(
        &self,
        credential: &mut Option<Credential>,
        bridge: &mut MessageBridge,
    ) -> LinkEnd {
        let connect = self.ctx.connector.connect(&self.account, credential.as_ref());
        let attempt = tokio::time::timeout(self.ctx.config.connect_timeout, connect)
            .await
            .unwrap_or_else(|_| Err(ConnectionError::Timeout.into()));
        let link = match attempt {
            Ok(link) => link,
            Err(e) if e.is_logged_out() => return LinkEnd::LoggedOut(e.to_string()),
            Err(e) if e.is_transient() => {
                self.publish_error("connect", &e);
                return LinkEnd::Dropped(e.to_string());
            }
            Err(e) => return LinkEnd::Fatal(e),
        };
        *self.transport.write().await = Some(link.transport);
        let end = self.pump(link.events, credential, bridge).await;
        self.close_transport().await;
        end
    }

    async fn pump(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        credential: &mut Option<Credential>,
        bridge: &mut MessageBridge,
    ) -> LinkEnd {
        let mut keys: Option<PairingKeys> = None;
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Qr { reference } => {
                    let fresh = generate_pairing_keys();
                    let challenge = QrChallenge::new(qr_payload(&reference, &fresh), self.ctx.config.qr_ttl);
                    keys = Some(fresh);
                    self.issue_qr(challenge).await;
                }
                TransportEvent::PairSuccess {
                    id,
                    push_name,
                    platform,
                    device_identity,
                } => {
                    let Some(pairing) = keys.take() else {
                        return LinkEnd::Fatal(PairingError::NoPendingChallenge.into());
                    };
                    let paired = Device::from_pairing(&pairing, id, push_name, platform, &device_identity)
                        .and_then(|device| device.encode());
                    let paired = match paired {
                        Ok(paired) => paired,
                        Err(e) => return LinkEnd::Fatal(e),
                    };
                    tracing::info!(account = %self.account, "pairing complete");
                    if let Err(e) = self.ctx.store.save(&self.account, &paired).await {
                        tracing::error!(account = %self.account, error = %e, "could not persist credential");
                        self.publish_error("save credential", &e);
                    }
                    *credential = Some(paired);
                }
                TransportEvent::Authenticated { user } => {
                    tracing::info!(account = %self.account, user = %user.id, name = %user.name, "connected");
                    self.transition(|s| s.connect(user)).await;
                }
                TransportEvent::Message(raw) => {
                    if let Some(message) = bridge.accept(&raw) {
                        self.ctx.broadcaster.publish(GatewayEvent::MessageReceived(message));
                    }
                }
                TransportEvent::Closed { failure, reason } => {
                    return match failure {
                        Some(code) if code.is_logged_out() => LinkEnd::LoggedOut(code.to_string()),
                        Some(code) if !code.is_transient() => {
                            LinkEnd::Fatal(ConnectionError::ConnectFailure(code).into())
                        }
                        _ => LinkEnd::Dropped(reason),
                    };
                }
            }
        }
        LinkEnd::Dropped("link closed".into())
    }

    async fn issue_qr(&self, challenge: QrChallenge) {
        let entered = {
            let mut state = self.state.write().await;
            let was_pending = state.state == SessionState::QrPending;
            state.replace_qr(challenge.clone());
            (!was_pending).then(|| state.status())
        };
        if let Some(status) = entered {
            self.announce(status);
        }
        tracing::info!(account = %self.account, expires_at = %challenge.expires_at, "QR code generated");
        self.ctx
            .broadcaster
            .publish(GatewayEvent::qr_generated(self.account.clone(), &challenge));
    }

    async fn transition(&self, apply: impl FnOnce(&mut AccountSession)) {
        let status = {
            let mut state = self.state.write().await;
            apply(&mut state);
            state.status()
        };
        self.announce(status);
    }

    fn announce(&self, status: StatusSnapshot) {
        tracing::debug!(
            account = %self.account,
            state = %status.state,
            attempt = status.reconnect_attempt,
            "state changed"
        );
        self.ctx.broadcaster.publish(GatewayEvent::ConnectionStatus(status));
    }

    async fn logged_out(&self, reason: &str) {
        self.transition(|s| s.enter(SessionState::LoggedOut)).await;
        self.ctx.broadcaster.publish(GatewayEvent::LoggedOut {
            account_id: self.account.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn fail(&self, context: &str, error: &Error) {
        self.publish_error(context, error);
        self.transition(|s| s.enter(SessionState::Disconnected)).await;
    }

    fn publish_error(&self, context: &str, error: &Error) {
        self.ctx
            .broadcaster
            .publish(GatewayEvent::error(self.account.clone(), context, error));
    }

    async fn close_transport(&self) {
        let transport = self.transport.write().await.take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                tracing::debug!(account = %self.account, error = %e, "closing link failed");
            }
        }
    }
}
