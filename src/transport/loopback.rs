//! In-process stand-in for the messaging network.
//!
//! Each account gets one simulated peer. The network side is driven through
//! control methods (`scan`, `deliver_text`, `drop_link`, `revoke`, ...) and
//! everything the gateway sends is recorded for inspection.

use super::{Connector, Link, RawMessage, Transport, TransportEvent};
use crate::bridge::{encode_text, generate_message_id};
use crate::error::{ConnectFailureReason, ConnectionError, Error};
use crate::pairing::{parse_qr_payload, tag_device_identity, Device};
use crate::session::ConnectedUser;
use crate::store::Credential;
use crate::types::{AccountId, Jid, MessageId};
use crate::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// What the next connect attempt for an account does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Open the link: resume with a credential, otherwise issue a QR reference.
    Accept,
    /// Fail with a transient transport error.
    Refuse(String),
    /// Reject the credential as logged out.
    Revoked,
    /// Never answer; the attempt hangs until the caller gives up.
    Stall,
}

/// A text the gateway sent through the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentText {
    pub id: MessageId,
    pub to: Jid,
    pub text: String,
}

#[derive(Default)]
struct Peer {
    script: VecDeque<ConnectOutcome>,
    link: Option<mpsc::UnboundedSender<TransportEvent>>,
    generation: u64,
    revoked: bool,
    send_failure: Option<String>,
    sent: Vec<SentText>,
    connects: usize,
}

type Peers = Arc<Mutex<HashMap<AccountId, Peer>>>;

fn lock(peers: &Peers) -> MutexGuard<'_, HashMap<AccountId, Peer>> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loopback [`Connector`].
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    peers: Peers,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next connect attempts of `account`. Once the
    /// script runs out every attempt is accepted.
    pub fn script(&self, account: &AccountId, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        lock(&self.peers)
            .entry(account.clone())
            .or_default()
            .script
            .extend(outcomes);
    }

    /// Issue a new pairing reference on the open link.
    pub fn issue_qr(&self, account: &AccountId) -> bool {
        self.push(account, TransportEvent::Qr {
            reference: new_reference(),
        })
    }

    /// Act as the phone scanning `payload`: confirm the pairing and then
    /// authenticate the link as `user`.
    pub fn scan(&self, account: &AccountId, payload: &str, user: ConnectedUser) -> Result<()> {
        let qr = parse_qr_payload(payload)?;
        let mut identity = b"adv-device-identity:".to_vec();
        identity.extend_from_slice(qr.reference.as_bytes());
        let device_identity = tag_device_identity(&identity, &qr.adv_secret)?;

        let mut peers = lock(&self.peers);
        let peer = peers.entry(account.clone()).or_default();
        let link = peer
            .link
            .as_ref()
            .ok_or(Error::Connection(ConnectionError::Disconnected))?;
        let paired = link.send(TransportEvent::PairSuccess {
            id: Jid {
                device: 1,
                ..user.id.clone()
            },
            push_name: user.name.clone(),
            platform: "android".into(),
            device_identity,
        });
        paired
            .and_then(|()| link.send(TransportEvent::Authenticated { user }))
            .map_err(|_| Error::Connection(ConnectionError::Disconnected))?;
        peer.revoked = false;
        Ok(())
    }

    /// Deliver a provider message to the account.
    pub fn deliver(&self, account: &AccountId, message: RawMessage) -> bool {
        self.push(account, TransportEvent::Message(message))
    }

    /// Deliver a plain text from `from`; returns the provider message id.
    pub fn deliver_text(&self, account: &AccountId, from: Jid, text: &str) -> Option<MessageId> {
        let id = generate_message_id();
        let message = RawMessage {
            id: id.clone(),
            from,
            from_me: false,
            timestamp: Utc::now(),
            content: encode_text(text),
        };
        self.deliver(account, message).then_some(id)
    }

    /// Drop the link the way a network hiccup would.
    pub fn drop_link(&self, account: &AccountId) -> bool {
        self.close_link(account, None, "connection reset")
    }

    /// Log the device out from the network side. Resuming with the old
    /// credential fails until the account pairs again.
    pub fn revoke(&self, account: &AccountId) -> bool {
        lock(&self.peers).entry(account.clone()).or_default().revoked = true;
        self.close_link(account, Some(ConnectFailureReason::LoggedOut), "device removed")
    }

    /// Make every send fail with `reason`, or succeed again with `None`.
    pub fn fail_sends(&self, account: &AccountId, reason: Option<&str>) {
        lock(&self.peers).entry(account.clone()).or_default().send_failure = reason.map(str::to_string);
    }

    pub fn sent(&self, account: &AccountId) -> Vec<SentText> {
        lock(&self.peers)
            .get(account)
            .map(|peer| peer.sent.clone())
            .unwrap_or_default()
    }

    pub fn connect_count(&self, account: &AccountId) -> usize {
        lock(&self.peers).get(account).map_or(0, |peer| peer.connects)
    }

    pub fn is_linked(&self, account: &AccountId) -> bool {
        lock(&self.peers)
            .get(account)
            .is_some_and(|peer| peer.link.as_ref().is_some_and(|link| !link.is_closed()))
    }

    fn push(&self, account: &AccountId, event: TransportEvent) -> bool {
        lock(&self.peers)
            .get(account)
            .and_then(|peer| peer.link.as_ref())
            .is_some_and(|link| link.send(event).is_ok())
    }

    fn close_link(&self, account: &AccountId, failure: Option<ConnectFailureReason>, reason: &str) -> bool {
        let link = lock(&self.peers).get_mut(account).and_then(|peer| peer.link.take());
        link.is_some_and(|link| {
            link.send(TransportEvent::Closed {
                failure,
                reason: reason.to_string(),
            })
            .is_ok()
        })
    }
}

#[async_trait]
impl Connector for LoopbackNetwork {
    async fn connect(&self, account: &AccountId, credential: Option<&Credential>) -> Result<Link> {
        let outcome = {
            let mut peers = lock(&self.peers);
            let peer = peers.entry(account.clone()).or_default();
            peer.connects += 1;
            peer.script.pop_front().unwrap_or(ConnectOutcome::Accept)
        };
        if outcome == ConnectOutcome::Stall {
            tracing::debug!(account = %account, "loopback connect stalled");
            return std::future::pending().await;
        }

        let mut peers = lock(&self.peers);
        let peer = peers.entry(account.clone()).or_default();
        match outcome {
            ConnectOutcome::Accept | ConnectOutcome::Stall => {}
            ConnectOutcome::Refuse(reason) => {
                return Err(ConnectionError::Transport(reason).into());
            }
            ConnectOutcome::Revoked => {
                peer.revoked = true;
                return Err(ConnectionError::ConnectFailure(ConnectFailureReason::LoggedOut).into());
            }
        }

        let (tx, events) = mpsc::unbounded_channel();
        match credential {
            Some(credential) => {
                if peer.revoked {
                    return Err(ConnectionError::ConnectFailure(ConnectFailureReason::LoggedOut).into());
                }
                let device = Device::decode(credential)?;
                let _ = tx.send(TransportEvent::Authenticated { user: device.user() });
            }
            None => {
                let _ = tx.send(TransportEvent::Qr {
                    reference: new_reference(),
                });
            }
        }

        peer.generation += 1;
        peer.link = Some(tx);
        tracing::debug!(account = %account, generation = peer.generation, "loopback link opened");
        Ok(Link {
            transport: Arc::new(LoopbackTransport {
                peers: Arc::clone(&self.peers),
                account: account.clone(),
                generation: peer.generation,
            }),
            events,
        })
    }
}

struct LoopbackTransport {
    peers: Peers,
    account: AccountId,
    generation: u64,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send_text(&self, to: &Jid, text: &str) -> Result<MessageId> {
        let mut peers = lock(&self.peers);
        let peer = peers
            .get_mut(&self.account)
            .filter(|peer| peer.generation == self.generation && peer.link.is_some())
            .ok_or(Error::Connection(ConnectionError::Disconnected))?;
        if let Some(reason) = &peer.send_failure {
            return Err(Error::SendFailed {
                reason: reason.clone(),
            });
        }
        let id = generate_message_id();
        peer.sent.push(SentText {
            id: id.clone(),
            to: to.clone(),
            text: text.to_string(),
        });
        Ok(id)
    }

    async fn close(&self) -> Result<()> {
        let mut peers = lock(&self.peers);
        if let Some(peer) = peers.get_mut(&self.account) {
            if peer.generation == self.generation {
                peer.link = None;
            }
        }
        Ok(())
    }
}

fn new_reference() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("2@{}", BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_USER_SERVER;
    use std::time::Duration;

    fn account() -> AccountId {
        AccountId::new("shop").unwrap()
    }

    #[tokio::test]
    async fn fresh_account_gets_qr_reference() {
        let net = LoopbackNetwork::new();
        let mut link = net.connect(&account(), None).await.unwrap();
        match link.events.recv().await.unwrap() {
            TransportEvent::Qr { reference } => assert!(reference.starts_with("2@")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(net.is_linked(&account()));
        assert_eq!(net.connect_count(&account()), 1);
    }

    #[tokio::test]
    async fn scripted_outcomes_run_in_order() {
        let net = LoopbackNetwork::new();
        net.script(
            &account(),
            [ConnectOutcome::Refuse("unreachable".into()), ConnectOutcome::Revoked],
        );
        let refused = net.connect(&account(), None).await.err().unwrap();
        assert!(refused.is_transient());
        let revoked = net.connect(&account(), None).await.err().unwrap();
        assert!(revoked.is_logged_out());
        assert!(net.connect(&account(), None).await.is_ok());
    }

    #[tokio::test]
    async fn stalled_connect_never_opens_a_link() {
        let net = LoopbackNetwork::new();
        net.script(&account(), [ConnectOutcome::Stall]);
        let attempt = tokio::time::timeout(Duration::from_millis(50), net.connect(&account(), None)).await;
        assert!(attempt.is_err());
        assert!(!net.is_linked(&account()));
        assert_eq!(net.connect_count(&account()), 1);
        assert!(net.connect(&account(), None).await.is_ok());
    }

    #[tokio::test]
    async fn sends_are_recorded_until_link_closes() {
        let net = LoopbackNetwork::new();
        let link = net.connect(&account(), None).await.unwrap();
        let to = Jid::new("628123", DEFAULT_USER_SERVER);

        let id = link.transport.send_text(&to, "halo").await.unwrap();
        assert_eq!(net.sent(&account())[0].id, id);

        net.fail_sends(&account(), Some("blocked"));
        let err = link.transport.send_text(&to, "halo").await.unwrap_err();
        assert!(matches!(err, Error::SendFailed { reason } if reason == "blocked"));

        link.transport.close().await.unwrap();
        assert!(!net.is_linked(&account()));
        assert!(link.transport.send_text(&to, "halo").await.is_err());
    }

    #[tokio::test]
    async fn delivered_text_reaches_open_link() {
        let net = LoopbackNetwork::new();
        let mut link = net.connect(&account(), None).await.unwrap();
        link.events.recv().await.unwrap();

        let from = Jid::new("628555", DEFAULT_USER_SERVER);
        let id = net.deliver_text(&account(), from.clone(), "halo").unwrap();
        match link.events.recv().await.unwrap() {
            TransportEvent::Message(raw) => {
                assert_eq!(raw.id, id);
                assert_eq!(raw.from, from);
                assert!(!raw.from_me);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(net.drop_link(&account()));
        assert!(matches!(
            link.events.recv().await.unwrap(),
            TransportEvent::Closed { failure: None, .. }
        ));
        assert!(net.deliver_text(&account(), from, "late").is_none());
    }

    #[tokio::test]
    async fn stale_transport_does_not_close_new_link() {
        let net = LoopbackNetwork::new();
        let old = net.connect(&account(), None).await.unwrap();
        let _new = net.connect(&account(), None).await.unwrap();
        old.transport.close().await.unwrap();
        assert!(net.is_linked(&account()));
    }
}
