//! System Account Directory
//!
//! Maps symbolic system account keys to ledger ids. One instance is built at
//! startup, warmed from the durable store, and shared by every consumer.
//! Reads hit the in-memory cache first and fall back to the store.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::SystemAccountKey;
use crate::ledger::IdGenerator;

use super::error::DirectoryError;
use super::store::{DirectoryEntry, DirectoryStore};

pub struct SystemAccountDirectory {
    store: Arc<dyn DirectoryStore>,
    cache: DashMap<SystemAccountKey, DirectoryEntry>,
    by_ledger_id: DashMap<u128, SystemAccountKey>,
    /// Serializes registrations so check-then-write is atomic per process
    register_lock: Mutex<()>,
}

impl SystemAccountDirectory {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            by_ledger_id: DashMap::new(),
            register_lock: Mutex::new(()),
        }
    }

    /// Load every persisted entry into the cache
    pub async fn load(&self) -> Result<usize, DirectoryError> {
        let entries = self.store.load_all().await?;
        let count = entries.len();
        for (key, entry) in entries {
            self.cache_entry(key, entry);
        }
        tracing::info!(entries = count, "System account directory loaded");
        Ok(count)
    }

    fn cache_entry(&self, key: SystemAccountKey, entry: DirectoryEntry) {
        self.by_ledger_id.insert(entry.ledger_id, key.clone());
        self.cache.insert(key, entry);
    }

    /// Entry for a key, or `None` if it was never registered
    pub async fn lookup(&self, key: &SystemAccountKey) -> Result<Option<DirectoryEntry>, DirectoryError> {
        if let Some(entry) = self.cache.get(key).map(|e| e.clone()) {
            tracing::debug!(key = %key, "Directory cache hit");
            return Ok(Some(entry));
        }

        tracing::debug!(key = %key, "Directory cache miss");
        let stored = self.store.get(key).await?;
        if let Some(entry) = &stored {
            self.cache_entry(key.clone(), entry.clone());
        }
        Ok(stored)
    }

    /// Ledger id for a key; `NotFound` means the caller has to provision it
    pub async fn resolve(&self, key: &SystemAccountKey) -> Result<u128, DirectoryError> {
        self.lookup(key)
            .await?
            .map(|entry| entry.ledger_id)
            .ok_or_else(|| DirectoryError::NotFound(key.to_string()))
    }

    /// Record a key's ledger id.
    ///
    /// Re-registering the same id refreshes the description. A different id
    /// for an existing key is refused with `Conflict`; the first id stays.
    pub async fn register(
        &self,
        key: &SystemAccountKey,
        ledger_id: u128,
        description: &str,
    ) -> Result<DirectoryEntry, DirectoryError> {
        let _guard = self.register_lock.lock().await;

        let existing = self.lookup(key).await?;
        let created_at = match &existing {
            Some(entry) if entry.ledger_id != ledger_id => {
                tracing::error!(
                    key = %key,
                    existing = %entry.ledger_id,
                    attempted = %ledger_id,
                    "Refusing to re-register system account with a different ledger id"
                );
                return Err(DirectoryError::Conflict {
                    key: key.to_string(),
                    existing: entry.ledger_id,
                    attempted: ledger_id,
                });
            }
            Some(entry) if entry.description == description => return Ok(entry.clone()),
            Some(entry) => entry.created_at,
            None => Utc::now(),
        };

        let entry = DirectoryEntry {
            ledger_id,
            category: key.category(),
            currency: key.currency(),
            description: description.to_string(),
            created_at,
        };
        let stored = self.store.upsert(key, entry).await?;
        self.cache_entry(key.clone(), stored.clone());

        tracing::info!(
            key = %key,
            ledger_id = %ledger_id,
            refreshed = existing.is_some(),
            "System account registered"
        );
        Ok(stored)
    }

    /// Reverse lookup over registered entries
    pub fn key_for_ledger_id(&self, ledger_id: u128) -> Option<SystemAccountKey> {
        self.by_ledger_id.get(&ledger_id).map(|k| k.clone())
    }

    pub fn is_system_ledger_id(&self, ledger_id: u128) -> bool {
        self.by_ledger_id.contains_key(&ledger_id)
    }

    /// Draw a fresh id for a customer account that is not a registered
    /// system account id
    pub fn allocate_customer_id(&self, ids: &IdGenerator) -> u128 {
        loop {
            let id = ids.generate();
            if !self.is_system_ledger_id(id) {
                return id;
            }
            tracing::warn!(ledger_id = %id, "Generated id collides with a system account, drawing again");
        }
    }

    /// All cached entries, ordered by key
    pub fn entries(&self) -> Vec<(SystemAccountKey, DirectoryEntry)> {
        let mut entries: Vec<_> = self
            .cache
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(key, _)| key.to_string());
        entries
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
