mod jid;

pub use jid::{Jid, JidParseError, DEFAULT_USER_SERVER};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message ID type (WhatsApp internal ID string).
pub type MessageId = String;

/// Stable identifier of one logical messaging account.
///
/// Restricted to `[A-Za-z0-9_.-]` (no leading dot) because the file
/// credential store uses it as a file name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 64
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(crate::Error::InvalidAccountId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_ids_are_file_name_safe() {
        assert!(AccountId::new("shop-main_01").is_ok());
        assert!(AccountId::new("v1.2").is_ok());
        for bad in ["", "../etc", ".hidden", "a/b", "with space"] {
            assert!(
                matches!(AccountId::new(bad), Err(crate::Error::InvalidAccountId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn account_id_deserialize_validates() {
        let ok: AccountId = serde_json::from_str("\"main\"").unwrap();
        assert_eq!(ok.as_str(), "main");
        assert!(serde_json::from_str::<AccountId>("\"a/b\"").is_err());
    }
}
