//! Audit event handler
//!
//! Appends one audit entry per ledger event. Audit failures surface as
//! handler errors; the dispatcher logs them and the other handlers still run.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::audit::{AuditAction, AuditLogBuilder, AuditSink};
use crate::cdc::{EventHandler, HandlerError};
use crate::domain::{CdcEvent, CdcEventType};

use super::dedupe::RecentEvents;

const RECENT_WINDOW: usize = 10_000;

pub struct AuditEventHandler {
    sink: Arc<dyn AuditSink>,
    recorded: Mutex<RecentEvents<(u128, CdcEventType)>>,
}

impl AuditEventHandler {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            recorded: Mutex::new(RecentEvents::new(RECENT_WINDOW)),
        }
    }
}

#[async_trait]
impl EventHandler for AuditEventHandler {
    fn name(&self) -> &str {
        "audit"
    }

    async fn handle(&self, event: &CdcEvent) -> Result<(), HandlerError> {
        let key = (event.transfer_id(), event.event_type);
        let already_recorded = self.recorded.lock().contains(&key);
        if already_recorded {
            tracing::debug!(transfer_id = %key.0, event_type = %key.1, "Event already audited");
            return Ok(());
        }

        let builder = AuditLogBuilder::new(AuditAction::for_event(event.event_type))
            .resource_type("Transfer")
            .resource_id(event.transfer_id())
            .after_state(event)?;
        let audit_id = self.sink.record(builder).await?;

        self.recorded.lock().insert(key);
        tracing::debug!(
            audit_id = %audit_id,
            transfer_id = %event.transfer_id(),
            event_type = %event.event_type,
            "Ledger event audited"
        );
        Ok(())
    }
}
