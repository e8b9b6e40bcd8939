use crate::session::SessionState;
use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the gateway and its components.
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    #[error("pairing: {0}")]
    Pairing(#[from] PairingError),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),

    #[error("session not connected")]
    SessionNotConnected,

    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    #[error("cannot issue a QR challenge while {0}")]
    InvalidStateForQr(SessionState),

    #[error("credential corrupt: {0}")]
    CredentialCorrupt(String),

    #[error("invalid account id: {0:?}")]
    InvalidAccountId(String),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The remote party invalidated our credential; re-pairing is required.
    pub fn is_logged_out(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError::ConnectFailure(reason)) if reason.is_logged_out()
        )
    }

    /// Errors the reconnect policy may retry. Everything else ends the run.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connection(ConnectionError::ConnectFailure(reason)) => reason.is_transient(),
            Error::Connection(_) => true,
            _ => false,
        }
    }
}

/// Connection-related errors.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("disconnected")]
    Disconnected,

    #[error("connect failure: {0}")]
    ConnectFailure(ConnectFailureReason),
}

/// Reason code for connection failures reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConnectFailureReason {
    Generic = 400,
    LoggedOut = 401,
    TempBanned = 402,
    MainDeviceGone = 403,
    ClientOutdated = 405,
    UnknownLogout = 406,
    BadUserAgent = 409,
    CATExpired = 413,
    CATInvalid = 414,
    NotFound = 415,
    ClientUnknown = 418,
    InternalServerError = 500,
    Experimental = 501,
    ServiceUnavailable = 503,
}

impl ConnectFailureReason {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn is_logged_out(&self) -> bool {
        matches!(
            self,
            Self::LoggedOut | Self::MainDeviceGone | Self::UnknownLogout
        )
    }

    /// Server-side hiccups worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Generic | Self::InternalServerError | Self::ServiceUnavailable
        )
    }
}

impl std::fmt::Display for ConnectFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::LoggedOut => "logged out from another device",
            Self::TempBanned => "account temporarily banned",
            Self::MainDeviceGone => "primary device was logged out",
            Self::UnknownLogout => "logged out for unknown reason",
            Self::ClientOutdated => "client is out of date",
            Self::BadUserAgent => "client user agent was rejected",
            Self::CATExpired => "messenger crypto auth token has expired",
            Self::CATInvalid => "messenger crypto auth token is invalid",
            Self::ServiceUnavailable => "service unavailable",
            _ => "connection failure",
        };
        write!(f, "{} (code {})", msg, self.code())
    }
}

/// Pairing-related errors.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("invalid device identity HMAC")]
    InvalidDeviceIdentityHmac,

    #[error("invalid device signature")]
    InvalidDeviceSignature,

    #[error("no QR challenge is pending")]
    NoPendingChallenge,

    #[error("malformed QR payload")]
    MalformedQr,

    #[error("protocol: {0}")]
    Protocol(String),
}

/// Credential store I/O errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("load failed for {account}: {source}")]
    Load {
        account: String,
        #[source]
        source: std::io::Error,
    },

    #[error("save failed for {account}: {source}")]
    Save {
        account: String,
        #[source]
        source: std::io::Error,
    },

    #[error("clear failed for {account}: {source}")]
    Clear {
        account: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_codes_are_not_transient() {
        for reason in [
            ConnectFailureReason::LoggedOut,
            ConnectFailureReason::MainDeviceGone,
            ConnectFailureReason::UnknownLogout,
        ] {
            assert!(reason.is_logged_out());
            let err = Error::Connection(ConnectionError::ConnectFailure(reason));
            assert!(err.is_logged_out());
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn network_errors_are_transient() {
        assert!(Error::Connection(ConnectionError::Timeout).is_transient());
        assert!(Error::Connection(ConnectionError::Transport("reset".into())).is_transient());
        let unavailable = ConnectFailureReason::ServiceUnavailable;
        assert!(Error::Connection(ConnectionError::ConnectFailure(unavailable)).is_transient());
        assert!(!Error::CredentialCorrupt("bad json".into()).is_transient());
        assert!(!Error::SessionNotConnected.is_transient());
    }

    #[test]
    fn failure_reason_display_carries_code() {
        let reason = ConnectFailureReason::MainDeviceGone;
        assert_eq!(reason.to_string(), "primary device was logged out (code 403)");
        assert_eq!(reason.code(), 403);
    }
}
