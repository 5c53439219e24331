//! Event handler contract
//!
//! Handlers receive each event they are registered for. A handler reports
//! failure through `HandlerError` (or by panicking); either way the
//! dispatcher logs it and moves on, so handlers must not rely on their
//! errors stopping anything. Delivery is at-least-once: handlers have to
//! tolerate seeing the same transfer again after a redelivery.

use async_trait::async_trait;

use crate::domain::CdcEvent;

/// Errors a handler may report back to the dispatcher
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Audit log error: {0}")]
    Audit(#[from] crate::audit::AuditLogError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A consumer of ledger change events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and dispatch reports
    fn name(&self) -> &str;

    async fn handle(&self, event: &CdcEvent) -> Result<(), HandlerError>;
}
