use super::{Credential, CredentialStore};
use crate::error::StoreError;
use crate::types::AccountId;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory credential store (for testing or single-run; not persistent).
#[derive(Default)]
pub struct MemoryStore {
    credentials: RwLock<HashMap<AccountId, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self, account: &AccountId) -> Result<Option<Credential>> {
        let credentials = self.credentials.read().map_err(|_| StoreError::Poisoned)?;
        Ok(credentials.get(account).cloned())
    }

    async fn save(&self, account: &AccountId, credential: &Credential) -> Result<()> {
        self.credentials
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(account.clone(), credential.clone());
        Ok(())
    }

    async fn clear(&self, account: &AccountId) -> Result<()> {
        self.credentials
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(account);
        Ok(())
    }
}
