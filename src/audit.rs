//! Append-only audit event log.
//!
//! Events are keyed `"{permit_id}/{nanos}-{event_id}"` so a prefix scan
//! returns a permit's trail in time order; the event id breaks ties.

use crate::error::ApprovalError;
use crate::store::{Store, decode, encode};
use crate::types::TimeStamp;
use crate::utils;
use chrono::Utc;
use tracing::warn;

pub const EVENT_EMAIL_ACTION: &str = "approval_email_action";
pub const EVENT_NOTIFICATIONS_SENT: &str = "approval_notifications_sent";
pub const EVENT_PERMIT_CANCELLED: &str = "permit_cancelled";

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct AuditEvent {
    #[n(0)]
    pub id: String, // "evt_1..."
    #[n(1)]
    pub permit_id: String,
    #[n(2)]
    pub event_type: String,
    #[n(3)]
    pub actor: String,
    #[n(4)]
    pub at: TimeStamp<Utc>,
    #[n(5)]
    pub payload: Vec<(String, String)>,
}

impl AuditEvent {
    pub fn new(
        permit_id: &str,
        event_type: &str,
        actor: &str,
        payload: Vec<(String, String)>,
    ) -> Result<Self, ApprovalError> {
        Ok(Self {
            id: utils::new_uuid_to_bech32("evt_")
                .map_err(|e| ApprovalError::Codec(e.to_string()))?,
            permit_id: permit_id.to_string(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            at: TimeStamp::new(),
            payload,
        })
    }

    pub fn key(&self) -> String {
        format!("{}/{:020}-{}", self.permit_id, self.at.nanos(), self.id)
    }
}

pub struct AuditLog<'a> {
    store: &'a Store,
}

impl<'a> AuditLog<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn append(
        &self,
        permit_id: &str,
        event_type: &str,
        actor: &str,
        payload: Vec<(String, String)>,
    ) -> Result<AuditEvent, ApprovalError> {
        let event = AuditEvent::new(permit_id, event_type, actor, payload)?;
        self.store
            .audit
            .insert(event.key().as_bytes(), encode(&event)?)?;
        Ok(event)
    }

    /// Fire-and-forget variant: a failed audit write is logged, never thrown.
    pub fn append_logged(
        &self,
        permit_id: &str,
        event_type: &str,
        actor: &str,
        payload: Vec<(String, String)>,
    ) {
        if let Err(err) = self.append(permit_id, event_type, actor, payload) {
            warn!(permit_id, event_type, %err, "audit event write failed");
        }
    }

    pub fn events_for(&self, permit_id: &str) -> Result<Vec<AuditEvent>, ApprovalError> {
        let prefix = format!("{permit_id}/");
        let mut out = vec![];
        for entry in self.store.audit.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }
}
