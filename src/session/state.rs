use crate::pairing::QrChallenge;
use crate::types::{AccountId, Jid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally observable connection state of one account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    QrPending,
    Connected,
    Reconnecting,
    /// The remote party invalidated the credential; a new QR pairing is required.
    LoggedOut,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::QrPending => "qr_pending",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::LoggedOut => "logged_out",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the authenticated account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectedUser {
    pub id: Jid,
    pub name: String,
}

/// Point-in-time view of an account's connection, as served to late joiners.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub account_id: AccountId,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ConnectedUser>,
    pub reconnect_attempt: u32,
    /// When `state` was entered.
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Status of an account nothing is known about yet.
    pub fn disconnected(account_id: AccountId) -> Self {
        Self {
            account_id,
            state: SessionState::Disconnected,
            user: None,
            reconnect_attempt: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Connection state owned by one session.
#[derive(Clone, Debug)]
pub struct AccountSession {
    pub account_id: AccountId,
    pub state: SessionState,
    pub connected_user: Option<ConnectedUser>,
    pub last_state_change_at: DateTime<Utc>,
    pub reconnect_attempt: u32,
    pub current_qr: Option<QrChallenge>,
}

impl AccountSession {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            state: SessionState::Disconnected,
            connected_user: None,
            last_state_change_at: Utc::now(),
            reconnect_attempt: 0,
            current_qr: None,
        }
    }

    /// Move to `next`, dropping whatever the new state cannot carry.
    pub fn enter(&mut self, next: SessionState) {
        self.state = next;
        self.last_state_change_at = Utc::now();
        if next != SessionState::Connected {
            self.connected_user = None;
        }
        if next != SessionState::QrPending {
            self.current_qr = None;
        }
        if next == SessionState::Connecting {
            self.reconnect_attempt = 0;
        }
    }

    pub fn connect(&mut self, user: ConnectedUser) {
        self.enter(SessionState::Connected);
        self.connected_user = Some(user);
        self.reconnect_attempt = 0;
    }

    pub fn reconnecting(&mut self, attempt: u32) {
        self.enter(SessionState::Reconnecting);
        self.reconnect_attempt = attempt;
    }

    /// Make `challenge` the current one; the previous challenge is returned
    /// and is no longer valid.
    pub fn replace_qr(&mut self, challenge: QrChallenge) -> Option<QrChallenge> {
        if self.state != SessionState::QrPending {
            self.enter(SessionState::QrPending);
        }
        self.current_qr.replace(challenge)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            account_id: self.account_id.clone(),
            state: self.state,
            user: self.connected_user.clone(),
            reconnect_attempt: self.reconnect_attempt,
            timestamp: self.last_state_change_at,
        }
    }
}
