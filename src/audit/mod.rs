//! Audit Log Service
//!
//! Tamper-evident audit trail of ledger events. Every entry carries the hash
//! of its predecessor, so editing or removing a row breaks the chain and is
//! caught by `verify_chain`.
//!
//! Two sinks share the hashing and verification code: `PgAuditLog` writes to
//! the `audit_logs` table, `MemoryAuditLog` keeps the chain in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::CdcEventType;

/// `previous_hash` of the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Advisory lock key serializing appends to the audit chain
const AUDIT_CHAIN_LOCK: i64 = 0x5345_5041_4155_4449;

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub sequence_number: i64,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub after_state: Option<serde_json::Value>,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    TransferPosted,
    TransferPending,
    PendingPosted,
    PendingVoided,
    PendingExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::TransferPosted => "ledger.transfer_posted",
            AuditAction::TransferPending => "ledger.transfer_pending",
            AuditAction::PendingPosted => "ledger.pending_posted",
            AuditAction::PendingVoided => "ledger.pending_voided",
            AuditAction::PendingExpired => "ledger.pending_expired",
        }
    }

    pub fn for_event(event_type: CdcEventType) -> Self {
        match event_type {
            CdcEventType::SinglePhase => AuditAction::TransferPosted,
            CdcEventType::TwoPhasePending => AuditAction::TransferPending,
            CdcEventType::TwoPhasePosted => AuditAction::PendingPosted,
            CdcEventType::TwoPhaseVoided => AuditAction::PendingVoided,
            CdcEventType::TwoPhaseExpired => AuditAction::PendingExpired,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: String,
    resource_type: Option<String>,
    resource_id: Option<String>,
    after_state: Option<serde_json::Value>,
}

impl AuditLogBuilder {
    pub fn new(action: AuditAction) -> Self {
        Self::custom(action.as_str())
    }

    /// Create with custom action string
    pub fn custom(action: &str) -> Self {
        Self {
            action: action.to_string(),
            resource_type: None,
            resource_id: None,
            after_state: None,
        }
    }

    pub fn resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }

    pub fn resource_id(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn after_state<T: Serialize>(mut self, state: &T) -> Result<Self, AuditLogError> {
        self.after_state = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Seal the entry onto the chain after `previous_hash`
    fn seal(self, sequence_number: i64, previous_hash: String) -> AuditLogEntry {
        let id = Uuid::new_v4();
        let current_hash = chain_hash(
            id,
            sequence_number,
            &self.action,
            self.resource_id.as_deref(),
            self.after_state.as_ref(),
            &previous_hash,
        );
        AuditLogEntry {
            id,
            sequence_number,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            after_state: self.after_state,
            previous_hash,
            current_hash,
            created_at: Utc::now(),
        }
    }
}

/// Where audit entries are appended
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, builder: AuditLogBuilder) -> Result<Uuid, AuditLogError>;

    /// Verify up to `limit` entries from the start of the chain
    async fn verify_chain(&self, limit: Option<i64>) -> Result<ChainVerificationResult, AuditLogError>;
}

// =========================================================================
// PostgreSQL sink
// =========================================================================

/// Audit log stored in `audit_logs`
#[derive(Debug, Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get recent audit logs
    pub async fn get_recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        self.fetch(
            r#"
            SELECT id, sequence_number, action, resource_type, resource_id,
                   after_state, previous_hash, current_hash, created_at
            FROM audit_logs
            ORDER BY sequence_number DESC
            LIMIT $1
            "#,
            limit,
        )
        .await
    }

    async fn fetch(&self, sql: &str, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let rows: Vec<(
            Uuid,
            i64,
            String,
            Option<String>,
            Option<String>,
            Option<serde_json::Value>,
            String,
            String,
            DateTime<Utc>,
        )> = sqlx::query_as(sql).bind(limit).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    sequence_number,
                    action,
                    resource_type,
                    resource_id,
                    after_state,
                    previous_hash,
                    current_hash,
                    created_at,
                )| AuditLogEntry {
                    id,
                    sequence_number,
                    action,
                    resource_type,
                    resource_id,
                    after_state,
                    previous_hash,
                    current_hash,
                    created_at,
                },
            )
            .collect())
    }
}

#[async_trait]
impl AuditSink for PgAuditLog {
    async fn record(&self, builder: AuditLogBuilder) -> Result<Uuid, AuditLogError> {
        let mut tx = self.pool.begin().await?;

        // Appends are serialized so two writers never share a predecessor
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(AUDIT_CHAIN_LOCK)
            .execute(&mut *tx)
            .await?;

        let last: Option<(i64, String)> = sqlx::query_as(
            "SELECT sequence_number, current_hash FROM audit_logs ORDER BY sequence_number DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let (sequence_number, previous_hash) = last
            .map(|(seq, hash)| (seq + 1, hash))
            .unwrap_or_else(|| (1, GENESIS_HASH.to_string()));
        let entry = builder.seal(sequence_number, previous_hash);

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, sequence_number, action, resource_type, resource_id,
                after_state, previous_hash, current_hash, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.sequence_number)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.after_state)
        .bind(&entry.previous_hash)
        .bind(&entry.current_hash)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            audit_id = %entry.id,
            action = %entry.action,
            "Audit log entry created"
        );

        Ok(entry.id)
    }

    async fn verify_chain(&self, limit: Option<i64>) -> Result<ChainVerificationResult, AuditLogError> {
        let entries = self
            .fetch(
                r#"
                SELECT id, sequence_number, action, resource_type, resource_id,
                       after_state, previous_hash, current_hash, created_at
                FROM audit_logs
                ORDER BY sequence_number ASC
                LIMIT $1
                "#,
                limit.unwrap_or(1000),
            )
            .await?;
        Ok(verify_entries(&entries))
    }
}

// =========================================================================
// In-memory sink
// =========================================================================

/// Audit chain kept in process (development runs and tests)
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, builder: AuditLogBuilder) -> Result<Uuid, AuditLogError> {
        let mut entries = self.entries.lock();
        let (sequence_number, previous_hash) = entries
            .last()
            .map(|last| (last.sequence_number + 1, last.current_hash.clone()))
            .unwrap_or_else(|| (1, GENESIS_HASH.to_string()));

        let entry = builder.seal(sequence_number, previous_hash);
        let id = entry.id;
        tracing::debug!(audit_id = %id, action = %entry.action, "Audit log entry created");
        entries.push(entry);
        Ok(id)
    }

    async fn verify_chain(&self, limit: Option<i64>) -> Result<ChainVerificationResult, AuditLogError> {
        let entries = self.entries.lock();
        let limit = limit.map(|l| l.max(0) as usize).unwrap_or(entries.len());
        let end = limit.min(entries.len());
        Ok(verify_entries(&entries[..end]))
    }
}

// =========================================================================
// Hash chain
// =========================================================================

/// Result of hash chain verification
#[derive(Debug, Clone)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

impl ChainVerificationResult {
    fn valid(entries_checked: u64) -> Self {
        Self {
            is_valid: true,
            entries_checked,
            first_invalid_entry: None,
            expected_hash: None,
            actual_hash: None,
        }
    }
}

/// Hash of one entry over its content and its predecessor's hash
pub fn chain_hash(
    id: Uuid,
    sequence_number: i64,
    action: &str,
    resource_id: Option<&str>,
    after_state: Option<&serde_json::Value>,
    previous_hash: &str,
) -> String {
    let hash_input = format!(
        "{}{}{}{}{}{}",
        id,
        sequence_number,
        action,
        resource_id.unwrap_or_default(),
        after_state.map(|v| v.to_string()).unwrap_or_default(),
        previous_hash
    );
    sha256_hex(&hash_input)
}

/// Walk entries in sequence order, checking linkage and recomputing hashes
pub fn verify_entries(entries: &[AuditLogEntry]) -> ChainVerificationResult {
    let mut previous_hash = GENESIS_HASH.to_string();

    for (checked, entry) in entries.iter().enumerate() {
        if entry.previous_hash != previous_hash {
            return ChainVerificationResult {
                is_valid: false,
                entries_checked: checked as u64 + 1,
                first_invalid_entry: Some(entry.id),
                expected_hash: Some(previous_hash),
                actual_hash: Some(entry.previous_hash.clone()),
            };
        }

        let calculated_hash = chain_hash(
            entry.id,
            entry.sequence_number,
            &entry.action,
            entry.resource_id.as_deref(),
            entry.after_state.as_ref(),
            &entry.previous_hash,
        );

        if calculated_hash != entry.current_hash {
            return ChainVerificationResult {
                is_valid: false,
                entries_checked: checked as u64 + 1,
                first_invalid_entry: Some(entry.id),
                expected_hash: Some(calculated_hash),
                actual_hash: Some(entry.current_hash.clone()),
            };
        }

        previous_hash = entry.current_hash.clone();
    }

    ChainVerificationResult::valid(entries.len() as u64)
}

/// Calculate SHA-256 hash and return as hex string
fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// =========================================================================
// Tests
// =========================================================================
