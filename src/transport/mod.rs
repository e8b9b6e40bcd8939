//! Transport abstraction for the connection layer.
//!
//! The wire protocol lives behind these traits. A [`Connector`] opens one
//! link per account; the link is a [`Transport`] for sending plus a stream
//! of [`TransportEvent`]s the session consumes until the link closes.

pub mod loopback;

pub use loopback::LoopbackNetwork;

use crate::error::ConnectFailureReason;
use crate::session::ConnectedUser;
use crate::store::Credential;
use crate::types::{AccountId, Jid, MessageId};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opens links to the messaging network.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect on behalf of `account`. With a credential the network is
    /// expected to resume the session; without one it should issue a
    /// pairing reference ([`TransportEvent::Qr`]).
    async fn connect(&self, account: &AccountId, credential: Option<&Credential>) -> Result<Link>;
}

/// Sending half of an open link.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a plain text message; returns the provider's message id.
    async fn send_text(&self, to: &Jid, text: &str) -> Result<MessageId>;

    /// Close the link.
    async fn close(&self) -> Result<()>;
}

/// An open connection: the sender plus its event stream.
pub struct Link {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// What the network tells a session over an open link.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// A new pairing reference; the session turns it into a QR challenge.
    Qr { reference: String },

    /// The phone scanned the QR code. `device_identity` is tagged with an
    /// HMAC keyed by the adv secret from that QR code.
    PairSuccess {
        id: Jid,
        push_name: String,
        platform: String,
        device_identity: Vec<u8>,
    },

    /// Credential accepted; the link is fully authenticated.
    Authenticated { user: ConnectedUser },

    /// Incoming message.
    Message(RawMessage),

    /// The network closed the link. `failure` distinguishes an explicit
    /// logout from a transient drop.
    Closed {
        failure: Option<ConnectFailureReason>,
        reason: String,
    },
}

/// A message as the provider delivers it.
#[derive(Clone, Debug)]
pub struct RawMessage {
    pub id: MessageId,
    pub from: Jid,
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    /// Provider-encoded message content (protobuf `Message`).
    pub content: Bytes,
}
