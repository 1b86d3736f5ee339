//! Permit record — owned externally, referenced by the approval engine

use crate::types::{DecisionSource, TimeStamp};
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum PermitStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    PendingApproval,
    #[n(2)]
    Active,
    #[n(3)]
    Rejected,
    #[n(4)]
    Cancelled,
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Permit {
    #[n(0)]
    pub id: String, // bech32-encoded uuid7, "permit_1..."
    #[n(1)]
    pub reference: String, // human-readable permit reference
    #[n(2)]
    pub status: PermitStatus,
    #[n(3)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub approved_by: Option<String>, // None when decided via emailed link
    #[n(5)]
    pub decision_source: Option<DecisionSource>,
    #[n(6)]
    pub approval_notes: Vec<String>, // append-only audit text, never overwritten
    #[n(7)]
    pub notified_at: Option<TimeStamp<Utc>>, // "already notified" guard
    #[n(8)]
    pub link_ids: Vec<String>, // every link ever issued, in issuance order
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
}

impl Permit {
    pub fn new(id: String, reference: String) -> Self {
        Self {
            id,
            reference,
            status: PermitStatus::Draft,
            approved_at: None,
            approved_by: None,
            decision_source: None,
            approval_notes: vec![],
            notified_at: None,
            link_ids: vec![],
            created_at: TimeStamp::new(),
        }
    }

    pub fn is_pending_approval(&self) -> bool {
        self.status == PermitStatus::PendingApproval
    }

    /// Notes are cumulative: each decision appends one attributed line.
    pub fn append_note(&mut self, line: String) {
        self.approval_notes.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permit_cbor_roundtrip() {
        let mut permit = Permit::new("permit_1abc".into(), "P-2024-001".into());
        permit.status = PermitStatus::PendingApproval;
        permit.append_note("submitted for approval".into());
        permit.link_ids.push("link_1abc".into());

        let encoded = minicbor::to_vec(&permit).unwrap();
        let decoded: Permit = minicbor::decode(&encoded).unwrap();

        assert_eq!(permit, decoded);
    }

    #[test]
    fn notes_are_append_only() {
        let mut permit = Permit::new("permit_1abc".into(), "P-2024-001".into());
        permit.append_note("first".into());
        permit.append_note("second".into());

        assert_eq!(permit.approval_notes, vec!["first", "second"]);
    }
}
