//! Status aggregation: per-recipient approval state for internal views.
//!
//! Read-only. Classification looks at the most recent link per
//! (permit, email); links belonging to emails no longer configured are
//! reported under `extra` so recipient-list edits never hide history.

use crate::error::ApprovalError;
use crate::link::{ApprovalLink, LinkState, UsedAction};
use crate::recipients::Recipient;
use crate::store::Store;
use crate::types::TimeStamp;
use chrono::Utc;
use std::collections::HashMap;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecipientLinkState {
    /// No link was ever issued to this recipient.
    Missing,
    /// A live link is out, undecided.
    Awaiting,
    /// The live window passed without a decision.
    Expired,
    Approved,
    Rejected,
    /// Superseded or cancelled without a decision.
    Invalidated,
}

#[derive(Debug, Clone)]
pub struct RecipientStatus {
    pub email: String,
    pub name: String,
    pub state: RecipientLinkState,
    pub link_id: Option<String>,
    pub expires_at: Option<TimeStamp<Utc>>,
    pub decided_at: Option<TimeStamp<Utc>>,
    pub comment: Option<String>,
}

#[derive(Debug, Default)]
pub struct PermitApprovalStatus {
    pub recipients: Vec<RecipientStatus>,
    /// Historical links for emails no longer in the configured list.
    pub extra: Vec<RecipientStatus>,
}

/// Collapse a link's derived state into the per-recipient display state.
pub fn classify(link: &ApprovalLink) -> RecipientLinkState {
    match link.state() {
        LinkState::Live => RecipientLinkState::Awaiting,
        LinkState::Expired => RecipientLinkState::Expired,
        LinkState::Decided(UsedAction::Approved) => RecipientLinkState::Approved,
        LinkState::Decided(UsedAction::Rejected) => RecipientLinkState::Rejected,
        LinkState::Decided(_) | LinkState::Invalidated(_) => RecipientLinkState::Invalidated,
    }
}

fn status_from_link(name: String, link: &ApprovalLink) -> RecipientStatus {
    RecipientStatus {
        email: link.recipient_email.clone(),
        name,
        state: classify(link),
        link_id: Some(link.id.clone()),
        expires_at: Some(link.expires_at.clone()),
        decided_at: link.used_at.clone(),
        comment: link.used_comment.clone(),
    }
}

pub struct StatusAggregator<'a> {
    store: &'a Store,
}

impl<'a> StatusAggregator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn status_for(
        &self,
        permit_ids: &[String],
        configured: &[Recipient],
    ) -> Result<HashMap<String, PermitApprovalStatus>, ApprovalError> {
        let mut out = HashMap::with_capacity(permit_ids.len());
        for permit_id in permit_ids {
            let permit = self.store.require_permit(permit_id)?;
            let links = self.store.links_for_permit(&permit)?;

            // newest link per email wins; link_ids are in issuance order
            let mut latest: HashMap<String, &ApprovalLink> = HashMap::new();
            for link in &links {
                latest.insert(link.recipient_email.clone(), link);
            }

            let mut status = PermitApprovalStatus::default();
            for recipient in configured {
                let email = recipient.email.to_lowercase();
                match latest.remove(&email) {
                    Some(link) => status
                        .recipients
                        .push(status_from_link(recipient.name.clone(), link)),
                    None => status.recipients.push(RecipientStatus {
                        email,
                        name: recipient.name.clone(),
                        state: RecipientLinkState::Missing,
                        link_id: None,
                        expires_at: None,
                        decided_at: None,
                        comment: None,
                    }),
                }
            }

            // whatever remains was sent to an email since removed from the
            // configured list
            let mut extra: Vec<&ApprovalLink> = latest.into_values().collect();
            extra.sort_by(|a, b| a.recipient_email.cmp(&b.recipient_email));
            for link in extra {
                status
                    .extra
                    .push(status_from_link(link.recipient_name.clone(), link));
            }

            out.insert(permit_id.clone(), status);
        }
        Ok(out)
    }
}
