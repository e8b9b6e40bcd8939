//! Event types published to subscribers.

use crate::bridge::{InboundMessage, OutboundMessage};
use crate::error::Error;
use crate::pairing::QrChallenge;
use crate::session::StatusSnapshot;
use crate::types::{AccountId, MessageId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Events published by sessions through the
/// [`EventBroadcaster`](crate::broadcast::EventBroadcaster).
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum GatewayEvent {
    /// A new pairing QR code; replaces any earlier one for the account.
    #[serde(rename = "qr:generated")]
    QrGenerated {
        account_id: AccountId,
        payload: String,
        timestamp: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },

    /// The account entered a new state.
    #[serde(rename = "connection:status")]
    ConnectionStatus(StatusSnapshot),

    /// The credential was invalidated; reconnecting will not help, a new
    /// QR pairing is needed.
    #[serde(rename = "connection:logged_out")]
    LoggedOut {
        account_id: AccountId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message:received")]
    MessageReceived(InboundMessage),

    #[serde(rename = "message:sent")]
    MessageSent {
        account_id: AccountId,
        to: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A failure inside a session that did not reach any caller.
    #[serde(rename = "error")]
    Error {
        account_id: AccountId,
        context: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl GatewayEvent {
    pub fn qr_generated(account_id: AccountId, challenge: &QrChallenge) -> Self {
        Self::QrGenerated {
            account_id,
            payload: challenge.payload.clone(),
            timestamp: challenge.issued_at,
            expires_at: challenge.expires_at,
        }
    }

    pub fn message_sent(account_id: AccountId, to: &str, result: &Result<OutboundMessage, Error>) -> Self {
        let (to, message_id, error) = match result {
            Ok(sent) => (sent.to.to_string(), Some(sent.raw_reference.clone()), None),
            Err(e) => (to.to_string(), None, Some(e.to_string())),
        };
        Self::MessageSent {
            account_id,
            to,
            success: result.is_ok(),
            message_id,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn error(account_id: AccountId, context: &str, error: &Error) -> Self {
        Self::Error {
            account_id,
            context: context.to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        match self {
            Self::QrGenerated { account_id, .. }
            | Self::LoggedOut { account_id, .. }
            | Self::MessageSent { account_id, .. }
            | Self::Error { account_id, .. } => account_id,
            Self::ConnectionStatus(status) => &status.account_id,
            Self::MessageReceived(message) => &message.account_id,
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QrGenerated { .. } => "qr:generated",
            Self::ConnectionStatus(_) => "connection:status",
            Self::LoggedOut { .. } => "connection:logged_out",
            Self::MessageReceived(_) => "message:received",
            Self::MessageSent { .. } => "message:sent",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn status_event_wire_shape() {
        let account = AccountId::new("toko").unwrap();
        let mut status = StatusSnapshot::disconnected(account);
        status.state = SessionState::Reconnecting;
        status.reconnect_attempt = 2;
        let event = GatewayEvent::ConnectionStatus(status);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["data"]["state"], "reconnecting");
        assert_eq!(json["data"]["reconnect_attempt"], 2);
        assert_eq!(event.account_id().as_str(), "toko");
    }

    #[test]
    fn failed_send_event_carries_reason() {
        let account = AccountId::new("toko").unwrap();
        let result = Err(Error::SendFailed {
            reason: "recipient blocked".into(),
        });
        let event = GatewayEvent::message_sent(account, "628123", &result);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message:sent");
        assert_eq!(json["data"]["success"], false);
        assert_eq!(json["data"]["to"], "628123");
        assert_eq!(json["data"]["error"], "send failed: recipient blocked");
        assert!(json["data"].get("message_id").is_none());
    }
}
