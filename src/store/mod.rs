//! Credential store: opaque session material keyed by account.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::types::AccountId;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Opaque credential material that lets a session resume without pairing.
///
/// The store never looks inside; [`Device`](crate::pairing::Device) knows
/// how to encode and verify it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential(Bytes);

impl Credential {
    pub fn new(blob: impl Into<Bytes>) -> Self {
        Self(blob.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Persist and load credentials.
///
/// Implementations must be safe to call concurrently for distinct accounts.
/// Writes for one account are serialized by its session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing is stored yet; `StorageUnavailable` when the
    /// backing medium cannot be read.
    async fn load(&self, account: &AccountId) -> crate::Result<Option<Credential>>;

    /// Atomically replace the stored credential.
    async fn save(&self, account: &AccountId, credential: &Credential) -> crate::Result<()>;

    /// Remove the credential. Clearing a missing credential is not an error.
    async fn clear(&self, account: &AccountId) -> crate::Result<()>;
}

/// Alias for the shared store handle (common usage).
pub type Store = Arc<dyn CredentialStore>;
