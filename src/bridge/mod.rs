//! Message bridge: provider messages in, normalized messages out, and the
//! reverse for sends.

mod dedup;
pub mod proto;

pub use dedup::{DedupKey, Deduplicator};

use crate::error::Error;
use crate::transport::{RawMessage, Transport};
use crate::types::{AccountId, Jid, MessageId};
use crate::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use prost::Message as _;
use serde::Serialize;
use sha2::Digest;
use std::time::Duration;

/// Content kind of a message. Anything not decoded further is `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Contact,
    Location,
    Reaction,
    Unknown,
}

/// Normalized incoming message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InboundMessage {
    pub account_id: AccountId,
    pub from: Jid,
    pub text: Option<String>,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub raw_reference: MessageId,
}

/// Normalized message we sent.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub account_id: AccountId,
    pub to: Jid,
    pub text: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub raw_reference: MessageId,
}

/// Per-account inbound side of the bridge; owned by the session task.
pub struct MessageBridge {
    account: AccountId,
    dedup: Deduplicator,
}

impl MessageBridge {
    pub fn new(account: AccountId, window: Duration, bucket: Duration) -> Self {
        Self {
            account,
            dedup: Deduplicator::new(window, bucket),
        }
    }

    /// Normalize `raw`, dropping our own echoes and redeliveries.
    pub fn accept(&mut self, raw: &RawMessage) -> Option<InboundMessage> {
        if raw.from_me {
            tracing::trace!(account = %self.account, id = %raw.id, "skipping own message");
            return None;
        }
        let message = normalize_inbound(&self.account, raw);
        if !self.dedup.observe(&message) {
            tracing::debug!(
                account = %self.account,
                from = %message.from,
                id = %message.raw_reference,
                "suppressed duplicate delivery"
            );
            return None;
        }
        Some(message)
    }
}

/// Translate a provider message. Never fails: content that cannot be
/// decoded is reported as [`MessageType::Unknown`] with no text.
pub fn normalize_inbound(account: &AccountId, raw: &RawMessage) -> InboundMessage {
    let (message_type, text) = match proto::Message::decode(raw.content.as_ref()) {
        Ok(content) => classify(content),
        Err(e) => {
            tracing::debug!(account = %account, id = %raw.id, error = %e, "undecodable message content");
            (MessageType::Unknown, None)
        }
    };
    InboundMessage {
        account_id: account.clone(),
        from: raw.from.to_non_ad(),
        text,
        message_type,
        timestamp: raw.timestamp,
        raw_reference: raw.id.clone(),
    }
}

fn classify(content: proto::Message) -> (MessageType, Option<String>) {
    if let Some(text) = content.conversation {
        return (MessageType::Text, Some(text));
    }
    if let Some(ext) = content.extended_text_message {
        return (MessageType::Text, ext.text);
    }
    let media = [
        (MessageType::Image, content.image_message),
        (MessageType::Video, content.video_message),
        (MessageType::Document, content.document_message),
        (MessageType::Audio, content.audio_message),
        (MessageType::Sticker, content.sticker_message),
    ];
    for (kind, media) in media {
        if let Some(media) = media {
            return (kind, media.caption);
        }
    }
    if let Some(contact) = content.contact_message {
        return (MessageType::Contact, contact.display_name);
    }
    if let Some(location) = content.location_message {
        return (MessageType::Location, location.name);
    }
    if let Some(reaction) = content.reaction_message {
        return (MessageType::Reaction, reaction.text);
    }
    (MessageType::Unknown, None)
}

/// Encode a plain text message the way the provider carries it.
pub fn encode_text(text: &str) -> Bytes {
    proto::Message {
        conversation: Some(text.to_string()),
        ..Default::default()
    }
    .encode_to_vec()
    .into()
}

/// Send `text` to `to` (phone number or JID) over an open link.
///
/// Whether the link may be used is the session's decision; this only maps
/// provider failures to [`Error::SendFailed`].
pub async fn send_outbound(
    transport: &dyn Transport,
    account: &AccountId,
    to: &str,
    text: &str,
) -> Result<OutboundMessage> {
    let jid = Jid::from_phone(to).map_err(|_| Error::InvalidAddress(to.to_string()))?;
    let id = transport.send_text(&jid, text).await.map_err(|e| match e {
        Error::SendFailed { reason } => Error::SendFailed { reason },
        other => Error::SendFailed {
            reason: other.to_string(),
        },
    })?;
    tracing::info!(account = %account, to = %jid, id = %id, "message sent");
    Ok(OutboundMessage {
        account_id: account.clone(),
        to: jid,
        text: text.to_string(),
        message_type: MessageType::Text,
        timestamp: Utc::now(),
        raw_reference: id,
    })
}

/// Generate a message ID in WhatsApp web format (3EB0 + hex of hash).
pub fn generate_message_id() -> MessageId {
    let mut data = Vec::with_capacity(8 + 5 + 16);
    data.extend_from_slice(&Utc::now().timestamp().to_be_bytes());
    data.extend_from_slice(b"@c.us");
    data.extend_from_slice(&rand::random::<[u8; 16]>());
    let hash = sha2::Sha256::digest(&data);
    format!("3EB0{}", hex::encode(&hash[..9]))
}
