//! Durable directory stores
//!
//! The directory keeps its cache in memory and writes through to one of
//! these stores. Entries are only ever added; an existing entry's ledger id
//! is immutable, only its metadata may be refreshed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::serde_ids::u128_string;
use crate::domain::{Currency, SystemAccountKey};

use super::error::DirectoryError;

/// Current version of the persisted document
pub const DOCUMENT_VERSION: u32 = 1;

/// A registered system account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    #[serde(with = "u128_string")]
    pub ledger_id: u128,
    pub category: String,
    pub currency: Currency,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted layout: `{version, lastUpdated, accounts: {key -> entry}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryDocument {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub accounts: BTreeMap<String, DirectoryEntry>,
}

impl DirectoryDocument {
    pub fn empty() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            last_updated: Utc::now(),
            accounts: BTreeMap::new(),
        }
    }

    fn entries(&self) -> Result<Vec<(SystemAccountKey, DirectoryEntry)>, DirectoryError> {
        self.accounts
            .iter()
            .map(|(key, entry)| {
                let parsed = key
                    .parse::<SystemAccountKey>()
                    .map_err(|e| DirectoryError::Corrupt(e.to_string()))?;
                Ok((parsed, entry.clone()))
            })
            .collect()
    }
}

/// Durable key -> entry mapping behind the directory cache
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<(SystemAccountKey, DirectoryEntry)>, DirectoryError>;

    async fn get(&self, key: &SystemAccountKey) -> Result<Option<DirectoryEntry>, DirectoryError>;

    /// Insert an entry, or refresh the metadata of an existing one.
    /// Returns `Conflict` if the key is stored with a different ledger id.
    async fn upsert(
        &self,
        key: &SystemAccountKey,
        entry: DirectoryEntry,
    ) -> Result<DirectoryEntry, DirectoryError>;
}

// =========================================================================
// JSON file store
// =========================================================================

/// Directory persisted as a single JSON document, replaced atomically on
/// every write (temp file, fsync, rename)
#[derive(Debug)]
pub struct FileDirectoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDirectoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<DirectoryDocument, DirectoryError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DirectoryDocument::empty());
            }
            Err(e) => return Err(e.into()),
        };

        let document: DirectoryDocument = serde_json::from_slice(&bytes)?;
        if document.version != DOCUMENT_VERSION {
            return Err(DirectoryError::UnsupportedVersion(document.version));
        }
        Ok(document)
    }

    async fn write_document(&self, document: &DirectoryDocument) -> Result<(), DirectoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let bytes = serde_json::to_vec_pretty(document)?;
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for FileDirectoryStore {
    async fn load_all(&self) -> Result<Vec<(SystemAccountKey, DirectoryEntry)>, DirectoryError> {
        self.read_document().await?.entries()
    }

    async fn get(&self, key: &SystemAccountKey) -> Result<Option<DirectoryEntry>, DirectoryError> {
        let document = self.read_document().await?;
        Ok(document.accounts.get(&key.to_string()).cloned())
    }

    async fn upsert(
        &self,
        key: &SystemAccountKey,
        entry: DirectoryEntry,
    ) -> Result<DirectoryEntry, DirectoryError> {
        // Read-modify-write under one lock
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        let key_str = key.to_string();

        let stored = match document.accounts.get(&key_str) {
            Some(existing) if existing.ledger_id != entry.ledger_id => {
                return Err(DirectoryError::Conflict {
                    key: key_str,
                    existing: existing.ledger_id,
                    attempted: entry.ledger_id,
                });
            }
            Some(existing) => DirectoryEntry {
                category: entry.category,
                description: entry.description,
                ..existing.clone()
            },
            None => entry,
        };

        document.accounts.insert(key_str, stored.clone());
        document.last_updated = Utc::now();
        self.write_document(&document).await?;

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SepaAccountType;

    fn entry(ledger_id: u128, description: &str) -> DirectoryEntry {
        DirectoryEntry {
            ledger_id,
            category: "SEPA_SETTLEMENT".to_string(),
            currency: Currency::Eur,
            description: description.to_string(),
            created_at: Utc::now(),
        }
    }

    fn settlement_eur() -> SystemAccountKey {
        SystemAccountKey::sepa(SepaAccountType::Settlement, Currency::Eur)
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDirectoryStore::new(dir.path().join("accounts.json"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_persists_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("accounts.json");
        let store = FileDirectoryStore::new(&path);

        store.upsert(&settlement_eur(), entry(42, "settlement")).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw["lastUpdated"].is_string());
        assert_eq!(raw["accounts"]["SEPA-SETTLEMENT-EUR"]["ledgerId"], "42");

        let reopened = FileDirectoryStore::new(&path);
        let loaded = reopened.get(&settlement_eur()).await.unwrap().unwrap();
        assert_eq!(loaded.ledger_id, 42);
        assert!(!dir.path().join("nested").join("accounts.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_upsert_refreshes_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDirectoryStore::new(dir.path().join("accounts.json"));

        let first = store.upsert(&settlement_eur(), entry(42, "old")).await.unwrap();
        let second = store.upsert(&settlement_eur(), entry(42, "new")).await.unwrap();
        assert_eq!(second.description, "new");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_upsert_rejects_different_ledger_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDirectoryStore::new(dir.path().join("accounts.json"));

        store.upsert(&settlement_eur(), entry(42, "a")).await.unwrap();
        let err = store.upsert(&settlement_eur(), entry(43, "b")).await.unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::Conflict {
                existing: 42,
                attempted: 43,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(
            &path,
            r#"{"version":2,"lastUpdated":"2024-01-01T00:00:00Z","accounts":{}}"#,
        )
        .unwrap();

        let store = FileDirectoryStore::new(&path);
        assert!(matches!(
            store.load_all().await,
            Err(DirectoryError::UnsupportedVersion(2))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(
            &path,
            r#"{"version":1,"lastUpdated":"2024-01-01T00:00:00Z","accounts":{"bogus":{"ledgerId":"1","category":"X","currency":"EUR","description":"","createdAt":"2024-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();

        let store = FileDirectoryStore::new(&path);
        assert!(matches!(
            store.load_all().await,
            Err(DirectoryError::Corrupt(_))
        ));
    }
}
