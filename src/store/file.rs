use super::{Credential, CredentialStore};
use crate::error::StoreError;
use crate::types::AccountId;
use crate::Result;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const EXTENSION: &str = "cred";

/// Credential store backed by one file per account under a directory.
///
/// Saves go through a temporary sibling file that is fsynced and then
/// renamed over the target, so a crash mid-write leaves either the old or
/// the new credential, never a torn one.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, account: &AccountId) -> PathBuf {
        self.dir.join(format!("{account}.{EXTENSION}"))
    }

    fn temp_path_for(&self, account: &AccountId) -> PathBuf {
        self.dir
            .join(format!(".{account}.{EXTENSION}.{}.tmp", uuid::Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load(&self, account: &AccountId) -> Result<Option<Credential>> {
        match fs::read(self.path_for(account)).await {
            Ok(blob) => Ok(Some(Credential::new(blob))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Load {
                account: account.to_string(),
                source,
            }
            .into()),
        }
    }

    async fn save(&self, account: &AccountId, credential: &Credential) -> Result<()> {
        let save_err = |source| StoreError::Save {
            account: account.to_string(),
            source,
        };

        fs::create_dir_all(&self.dir).await.map_err(save_err)?;

        let tmp_path = self.temp_path_for(account);
        let written = async {
            let mut tmp = fs::File::create(&tmp_path).await?;
            tmp.write_all(credential.as_bytes()).await?;
            tmp.sync_all().await?;
            drop(tmp);
            fs::rename(&tmp_path, self.path_for(account)).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(save_err(e).into());
        }
        tracing::debug!(account = %account, "credential saved");
        Ok(())
    }

    async fn clear(&self, account: &AccountId) -> Result<()> {
        match fs::remove_file(self.path_for(account)).await {
            Ok(()) => {
                tracing::debug!(account = %account, "credential cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Clear {
                account: account.to_string(),
                source,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn account(id: &str) -> AccountId {
        AccountId::new(id).unwrap()
    }

    #[tokio::test]
    async fn file_store_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("sessions"));
        let a = account("main");

        assert!(store.load(&a).await.unwrap().is_none());
        store.save(&a, &Credential::new(&b"one"[..])).await.unwrap();
        store.save(&a, &Credential::new(&b"two"[..])).await.unwrap();
        assert_eq!(store.load(&a).await.unwrap().unwrap().as_bytes(), b"two");

        // Only the final file remains; no temp files are left behind.
        let mut entries = std::fs::read_dir(store.dir()).unwrap();
        let only = entries.next().unwrap().unwrap();
        assert_eq!(only.file_name(), "main.cred");
        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn file_store_clear_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let a = account("main");
        store.clear(&a).await.unwrap();
        store.save(&a, &Credential::new(&b"x"[..])).await.unwrap();
        store.clear(&a).await.unwrap();
        assert!(store.load(&a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_medium_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let a = account("main");
        // A directory where the credential file should be cannot be read as a file.
        std::fs::create_dir(dir.path().join("main.cred")).unwrap();
        let err = store.load(&a).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(StoreError::Load { .. })));
    }
}
