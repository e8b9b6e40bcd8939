use std::fmt;
use std::str::FromStr;

/// Server for regular user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const LEGACY_USER_SERVER: &str = "c.us";

/// Network address of a user, group or device (`user[:device]@server`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: 0,
            server: server.into(),
        }
    }

    /// Address a phone number on the default user server.
    ///
    /// Accepts either a full address (`628123@s.whatsapp.net`) or a phone
    /// number in any common notation (`+62 812-3`); everything except
    /// digits is stripped from the latter.
    pub fn from_phone(input: &str) -> Result<Self, JidParseError> {
        let input = input.trim();
        if input.contains('@') {
            return input.parse();
        }
        let digits: String = input.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(JidParseError);
        }
        Ok(Self::new(digits, DEFAULT_USER_SERVER))
    }

    /// Same address without the device suffix.
    pub fn to_non_ad(&self) -> Self {
        Self::new(self.user.clone(), self.server.clone())
    }
}

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (user, server) = s.split_once('@').ok_or(JidParseError)?;
        if server.is_empty() || server.contains('@') {
            return Err(JidParseError);
        }
        let (user, device) = match user.split_once(':') {
            Some((user, device)) => (user, device.parse().map_err(|_| JidParseError)?),
            None => (user, 0),
        };
        // Legacy `c.us` addresses are the same accounts as `s.whatsapp.net`.
        let server = if server == LEGACY_USER_SERVER {
            DEFAULT_USER_SERVER
        } else {
            server
        };
        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JidParseError;

impl fmt::Display for JidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid JID format")
    }
}

impl std::error::Error for JidParseError {}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl serde::Serialize for Jid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Jid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Jid::from_str(&s).map_err(serde::de::Error::custom)
    }
}
