//! PostgreSQL directory store
//!
//! Rows live in `system_accounts`. Ledger ids are 128-bit, so they are
//! stored as decimal text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Currency, SystemAccountKey};

use super::error::DirectoryError;
use super::store::{DirectoryEntry, DirectoryStore};

type EntryRow = (String, String, String, String, DateTime<Utc>);

/// Directory store backed by the `system_accounts` table
#[derive(Debug, Clone)]
pub struct PgDirectoryStore {
    pool: PgPool,
}

impl PgDirectoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_entry(row: EntryRow) -> Result<DirectoryEntry, DirectoryError> {
    let (ledger_id, category, currency, description, created_at) = row;
    let ledger_id = ledger_id
        .parse::<u128>()
        .map_err(|_| DirectoryError::Corrupt(format!("ledger id {}", ledger_id)))?;
    let currency = currency
        .parse::<Currency>()
        .map_err(|e| DirectoryError::Corrupt(e.to_string()))?;

    Ok(DirectoryEntry {
        ledger_id,
        category,
        currency,
        description,
        created_at,
    })
}

#[async_trait]
impl DirectoryStore for PgDirectoryStore {
    async fn load_all(&self) -> Result<Vec<(SystemAccountKey, DirectoryEntry)>, DirectoryError> {
        let rows: Vec<(String, String, String, String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT account_key, ledger_id, category, currency, description, created_at
            FROM system_accounts
            ORDER BY account_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(key, ledger_id, category, currency, description, created_at)| {
                let key = key
                    .parse::<SystemAccountKey>()
                    .map_err(|e| DirectoryError::Corrupt(e.to_string()))?;
                let entry = decode_entry((ledger_id, category, currency, description, created_at))?;
                Ok((key, entry))
            })
            .collect()
    }

    async fn get(&self, key: &SystemAccountKey) -> Result<Option<DirectoryEntry>, DirectoryError> {
        let row: Option<EntryRow> = sqlx::query_as(
            r#"
            SELECT ledger_id, category, currency, description, created_at
            FROM system_accounts
            WHERE account_key = $1
            "#,
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_entry).transpose()
    }

    async fn upsert(
        &self,
        key: &SystemAccountKey,
        entry: DirectoryEntry,
    ) -> Result<DirectoryEntry, DirectoryError> {
        // The WHERE clause keeps an existing ledger id immutable: a row with a
        // different id is left untouched and nothing is returned.
        let row: Option<EntryRow> = sqlx::query_as(
            r#"
            INSERT INTO system_accounts (
                account_key, ledger_id, category, currency, description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (account_key) DO UPDATE
                SET category = EXCLUDED.category,
                    description = EXCLUDED.description,
                    updated_at = NOW()
                WHERE system_accounts.ledger_id = EXCLUDED.ledger_id
            RETURNING ledger_id, category, currency, description, created_at
            "#,
        )
        .bind(key.to_string())
        .bind(entry.ledger_id.to_string())
        .bind(&entry.category)
        .bind(entry.currency.code())
        .bind(&entry.description)
        .bind(entry.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => decode_entry(row),
            None => {
                let existing = self
                    .get(key)
                    .await?
                    .ok_or_else(|| DirectoryError::NotFound(key.to_string()))?;
                Err(DirectoryError::Conflict {
                    key: key.to_string(),
                    existing: existing.ledger_id,
                    attempted: entry.ledger_id,
                })
            }
        }
    }
}
