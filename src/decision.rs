//! Decision processor: exactly-once application of an irreversible decision.
//!
//! The whole of `decide` runs as one sled transaction over the link, index,
//! permit and audit trees. Two racing clicks on the same token serialize
//! here; the loser re-reads the link with `used_at` set and gets
//! `AlreadyUsed`, never a second permit transition.

use crate::audit::{AuditEvent, EVENT_EMAIL_ACTION};
use crate::error::ApprovalError;
use crate::link::{ApprovalLink, UsedAction};
use crate::permit::{Permit, PermitStatus};
use crate::store::Store;
use crate::types::{DecisionSource, RequestContext, TimeStamp};
use sled::Transactional;
use sled::transaction::ConflictableTransactionError;
use tracing::{info, warn};

const MAX_COMMENT_LEN: usize = 2_000;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DecisionAction {
    Approve,
    Reject,
}

impl DecisionAction {
    /// Parse the `intent` query parameter of quick-decision URLs.
    pub fn from_intent(intent: &str) -> Result<Self, ApprovalError> {
        match intent {
            "approve" => Ok(DecisionAction::Approve),
            "reject" => Ok(DecisionAction::Reject),
            other => Err(ApprovalError::Validation(format!(
                "unknown decision intent: {other}"
            ))),
        }
    }

    fn as_used_action(self) -> UsedAction {
        match self {
            DecisionAction::Approve => UsedAction::Approved,
            DecisionAction::Reject => UsedAction::Rejected,
        }
    }

    fn new_permit_status(self) -> PermitStatus {
        match self {
            DecisionAction::Approve => PermitStatus::Active,
            DecisionAction::Reject => PermitStatus::Rejected,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub decision: UsedAction,
    pub permit_id: String,
    pub permit_ref: String,
}

pub struct DecisionProcessor<'a> {
    store: &'a Store,
}

impl<'a> DecisionProcessor<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn decide(
        &self,
        raw_token: &str,
        action: DecisionAction,
        comment: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let comment = match comment.map(str::trim) {
            Some("") | None => None,
            Some(c) if c.len() > MAX_COMMENT_LEN => {
                return Err(ApprovalError::Validation("comment too long".into()));
            }
            Some(c) => Some(c.to_string()),
        };
        let token_hash = crate::token::hash(raw_token);

        let result = (
            &self.store.links,
            &self.store.token_index,
            &self.store.permits,
            &self.store.audit,
        )
            .transaction(|(links, token_index, permits, audit)| {
                let abort = |e: ApprovalError| ConflictableTransactionError::Abort(e);

                // 1. resolve the token to a link
                let link_id = token_index
                    .get(token_hash.as_bytes())?
                    .ok_or(abort(ApprovalError::NotFound))?;
                let link_bytes = links
                    .get(&link_id)?
                    .ok_or(abort(ApprovalError::NotFound))?;
                let mut link: ApprovalLink =
                    minicbor::decode(&link_bytes).map_err(|e| abort(e.into()))?;

                // 2. the link must still be live
                if let Some(used_action) = link.used_action {
                    return Err(abort(ApprovalError::AlreadyUsed(used_action)));
                }
                if link.expires_at.is_past() {
                    return Err(abort(ApprovalError::Expired));
                }

                // 3. the permit must still be awaiting a decision; if it is
                // not, the link is left untouched (it expires naturally)
                let permit_bytes = permits
                    .get(link.permit_id.as_bytes())?
                    .ok_or(abort(ApprovalError::NotFound))?;
                let mut permit: Permit =
                    minicbor::decode(&permit_bytes).map_err(|e| abort(e.into()))?;
                if permit.status != PermitStatus::PendingApproval {
                    return Err(abort(ApprovalError::InvalidState(permit.status)));
                }

                // 4-6. apply the decision to the permit
                let decision = action.as_used_action();
                let now = TimeStamp::new();
                let mut note = format!(
                    "{} via emailed approval link by {} <{}> at {}",
                    decision.as_str(),
                    link.recipient_name,
                    link.recipient_email,
                    now.display(),
                );
                if let Some(c) = &comment {
                    note.push_str(&format!(", comment: {c}"));
                }
                permit.append_note(note);
                permit.status = action.new_permit_status();
                permit.approved_at = Some(now);
                permit.approved_by = None;
                permit.decision_source = Some(DecisionSource::EmailLink);

                // 7. no other recipient can act once a decision is taken
                for sibling_id in &permit.link_ids {
                    if sibling_id == &link.id {
                        continue;
                    }
                    let Some(bytes) = links.get(sibling_id.as_bytes())? else {
                        continue;
                    };
                    let mut sibling: ApprovalLink =
                        minicbor::decode(&bytes).map_err(|e| abort(e.into()))?;
                    if sibling.is_live() {
                        sibling.mark_used(UsedAction::DecisionTaken, None);
                        links.insert(
                            sibling.id.as_bytes(),
                            minicbor::to_vec(&sibling).map_err(|e| abort(e.into()))?,
                        )?;
                    }
                }

                // 8. consume the acted-upon link
                link.mark_used(decision, comment.clone());
                links.insert(
                    link.id.as_bytes(),
                    minicbor::to_vec(&link).map_err(|e| abort(e.into()))?,
                )?;
                permits.insert(
                    permit.id.as_bytes(),
                    minicbor::to_vec(&permit).map_err(|e| abort(e.into()))?,
                )?;

                // 9. exactly one audit event per applied decision
                let mut payload = vec![
                    ("decision".to_string(), decision.as_str().to_string()),
                    ("link_id".to_string(), link.id.clone()),
                ];
                if let Some(c) = &comment {
                    payload.push(("comment".to_string(), c.clone()));
                }
                if let Some(ip) = &ctx.ip {
                    payload.push(("ip".to_string(), ip.clone()));
                }
                if let Some(ua) = &ctx.user_agent {
                    payload.push(("user_agent".to_string(), ua.clone()));
                }
                let event =
                    AuditEvent::new(&permit.id, EVENT_EMAIL_ACTION, &link.recipient_email, payload)
                        .map_err(abort)?;
                audit.insert(
                    event.key().as_bytes(),
                    minicbor::to_vec(&event).map_err(|e| abort(e.into()))?,
                )?;

                Ok(DecisionOutcome {
                    decision,
                    permit_id: permit.id.clone(),
                    permit_ref: permit.reference.clone(),
                })
            });

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(sled::transaction::TransactionError::Abort(e)) => return Err(e),
            Err(sled::transaction::TransactionError::Storage(e)) => {
                return Err(ApprovalError::Store(e));
            }
        };

        info!(
            permit_id = %outcome.permit_id,
            permit_ref = %outcome.permit_ref,
            decision = outcome.decision.as_str(),
            "decision applied via approval link"
        );

        // 11. post-commit, best-effort: allow a future re-entry into
        // pending_approval to notify again
        self.clear_notified_flag(&outcome.permit_id);

        Ok(outcome)
    }

    fn clear_notified_flag(&self, permit_id: &str) {
        if let Err(err) = self.store.clear_notified(permit_id) {
            warn!(permit_id, %err, "failed to clear notification flag after decision");
        }
    }
}
