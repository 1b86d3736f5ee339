//! Approval link records and their derived lifecycle state

use crate::types::TimeStamp;
use chrono::Utc;

/// Why a link stopped being live. `Approved`/`Rejected` mean a decision was
/// applied through this link; the rest are invalidations without a decision.
#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum UsedAction {
    #[n(0)]
    Approved,
    #[n(1)]
    Rejected,
    #[n(2)]
    Superseded,
    #[n(3)]
    DecisionTaken,
    #[n(4)]
    PermitCancelled,
    #[n(5)]
    Cancelled,
}

impl UsedAction {
    pub fn is_decision(&self) -> bool {
        matches!(self, UsedAction::Approved | UsedAction::Rejected)
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            UsedAction::Approved => "approved",
            UsedAction::Rejected => "rejected",
            UsedAction::Superseded => "superseded",
            UsedAction::DecisionTaken => "decision_taken",
            UsedAction::PermitCancelled => "permit_cancelled",
            UsedAction::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle state derived from the persisted fields, computed once on read
/// so consumers don't repeat the null checks.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LinkState {
    Live,
    Expired,
    Decided(UsedAction),
    Invalidated(UsedAction),
}

/// Opaque display/debug context carried on a link. Never consulted for
/// authorization. `extra` allows additive fields without a schema change.
#[derive(Debug, PartialEq, Eq, Clone, Default, minicbor::Encode, minicbor::Decode)]
pub struct LinkMetadata {
    #[n(0)]
    pub recipient_id: Option<String>,
    #[n(1)]
    pub permit_ref: Option<String>,
    #[n(2)]
    pub template_name: Option<String>,
    #[n(3)]
    pub decision: Option<String>,
    #[n(4)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub extra: Vec<(String, String)>,
}

// One row per issued token. Never deleted, retained for audit.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalLink {
    #[n(0)]
    pub id: String, // bech32-encoded uuid7, "link_1..."
    #[n(1)]
    pub permit_id: String,
    #[n(2)]
    pub recipient_email: String, // lowercased snapshot, not a live reference
    #[n(3)]
    pub recipient_name: String,
    #[n(4)]
    pub token_hash: String, // hex sha256, the only persisted form of the secret
    #[n(5)]
    pub expires_at: TimeStamp<Utc>,
    #[n(6)]
    pub used_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub used_action: Option<UsedAction>,
    #[n(8)]
    pub used_comment: Option<String>,
    #[n(9)]
    pub metadata: LinkMetadata,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
}

impl ApprovalLink {
    pub fn state(&self) -> LinkState {
        match self.used_action {
            Some(action) if action.is_decision() => LinkState::Decided(action),
            Some(action) => LinkState::Invalidated(action),
            None if self.expires_at.is_past() => LinkState::Expired,
            None => LinkState::Live,
        }
    }

    /// Unused and unexpired: the only state in which a decision can apply.
    pub fn is_live(&self) -> bool {
        self.state() == LinkState::Live
    }

    pub fn matches_recipient(&self, email: &str) -> bool {
        self.recipient_email == email.to_lowercase()
    }

    /// Terminal write for a link. Sets the used triple exactly once.
    pub fn mark_used(&mut self, action: UsedAction, comment: Option<String>) {
        self.used_at = Some(TimeStamp::new());
        self.used_action = Some(action);
        self.used_comment = comment;
        if action.is_decision() {
            self.metadata.decision = Some(action.as_str().to_string());
            self.metadata.decided_at = self.used_at.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_link(expires_at: TimeStamp<Utc>) -> ApprovalLink {
        ApprovalLink {
            id: "link_1test".into(),
            permit_id: "permit_1test".into(),
            recipient_email: "a@x.com".into(),
            recipient_name: "A".into(),
            token_hash: "deadbeef".into(),
            expires_at,
            used_at: None,
            used_action: None,
            used_comment: None,
            metadata: LinkMetadata::default(),
            created_at: TimeStamp::new(),
        }
    }

    #[test]
    fn fresh_link_is_live() {
        let link = sample_link(TimeStamp::new().offset(chrono::Duration::days(7)));
        assert_eq!(link.state(), LinkState::Live);
        assert!(link.is_live());
    }

    #[test]
    fn past_expiry_derives_expired() {
        let link = sample_link(TimeStamp::new().offset(chrono::Duration::seconds(-1)));
        assert_eq!(link.state(), LinkState::Expired);
    }

    #[test]
    fn used_action_wins_over_expiry() {
        let mut link = sample_link(TimeStamp::new().offset(chrono::Duration::seconds(-1)));
        link.mark_used(UsedAction::Approved, Some("fine".into()));

        assert_eq!(link.state(), LinkState::Decided(UsedAction::Approved));
        assert_eq!(link.metadata.decision.as_deref(), Some("approved"));
        assert!(link.metadata.decided_at.is_some());
    }

    #[test]
    fn invalidation_does_not_set_decision_metadata() {
        let mut link = sample_link(TimeStamp::new().offset(chrono::Duration::days(7)));
        link.mark_used(UsedAction::Superseded, None);

        assert_eq!(link.state(), LinkState::Invalidated(UsedAction::Superseded));
        assert!(link.metadata.decision.is_none());
    }

    #[test]
    fn link_cbor_roundtrip() {
        let mut link = sample_link(TimeStamp::new().offset(chrono::Duration::days(7)));
        link.metadata.extra.push(("channel".into(), "email".into()));

        let encoded = minicbor::to_vec(&link).unwrap();
        let decoded: ApprovalLink = minicbor::decode(&encoded).unwrap();

        assert_eq!(link, decoded);
    }
}
