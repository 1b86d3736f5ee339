//! Service layer API tying the approval engine together for internal UIs

use crate::audit::{AuditLog, EVENT_PERMIT_CANCELLED};
use crate::decision::{DecisionAction, DecisionOutcome, DecisionProcessor};
use crate::dispatch::{DispatchConfig, EmailQueue, NotificationDispatcher};
use crate::error::ApprovalError;
use crate::link::{ApprovalLink, UsedAction};
use crate::permit::{Permit, PermitStatus};
use crate::recipients::RecipientDirectory;
use crate::status::{PermitApprovalStatus, StatusAggregator};
use crate::store::Store;
use crate::types::{RequestContext, TimeStamp};
use crate::utils;
use sled::Transactional;
use sled::transaction::ConflictableTransactionError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

pub struct ApprovalService {
    store: Store,
    queue: Arc<dyn EmailQueue + Send + Sync>,
    config: DispatchConfig,
}

impl ApprovalService {
    pub fn open(
        db: &Arc<sled::Db>,
        queue: Arc<dyn EmailQueue + Send + Sync>,
        config: DispatchConfig,
    ) -> Result<Self, ApprovalError> {
        Ok(Self {
            store: Store::open(db)?,
            queue,
            config,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn recipients(&self) -> RecipientDirectory<'_> {
        RecipientDirectory::new(&self.store)
    }

    pub fn audit(&self) -> AuditLog<'_> {
        AuditLog::new(&self.store)
    }

    pub fn create_permit(&self, reference: &str) -> Result<Permit, ApprovalError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ApprovalError::Validation("permit reference is empty".into()));
        }
        let id = utils::new_uuid_to_bech32("permit_")
            .map_err(|e| ApprovalError::Codec(e.to_string()))?;
        let permit = Permit::new(id, reference.to_string());
        self.store.insert_permit(&permit)?;
        Ok(permit)
    }

    pub fn permit(&self, permit_id: &str) -> Result<Permit, ApprovalError> {
        self.store.require_permit(permit_id)
    }

    pub fn links_for_permit(&self, permit_id: &str) -> Result<Vec<ApprovalLink>, ApprovalError> {
        let permit = self.store.require_permit(permit_id)?;
        self.store.links_for_permit(&permit)
    }

    /// Transition a permit into pending approval and synchronously notify
    /// the configured recipients. Returns how many messages were queued.
    pub fn submit_for_approval(&self, permit_id: &str) -> Result<usize, ApprovalError> {
        let mut permit = self.store.require_permit(permit_id)?;
        if permit.status == PermitStatus::Cancelled {
            return Err(ApprovalError::InvalidState(permit.status));
        }
        if permit.status != PermitStatus::PendingApproval {
            permit.status = PermitStatus::PendingApproval;
            permit.approved_at = None;
            permit.approved_by = None;
            permit.decision_source = None;
            permit.append_note(format!(
                "submitted for approval at {}",
                TimeStamp::new().display()
            ));
            self.store.insert_permit(&permit)?;
        }

        NotificationDispatcher::new(&self.store, self.queue.as_ref(), &self.config)
            .notify_pending(permit_id)
    }

    /// The decision endpoint. Expected outcomes (used, expired, no longer
    /// pending) are logged at info; storage failures at error.
    pub fn decide(
        &self,
        raw_token: &str,
        action: DecisionAction,
        comment: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let result = DecisionProcessor::new(&self.store).decide(raw_token, action, comment, ctx);
        if let Err(err) = &result {
            if err.is_expected() {
                info!(%err, "decision link resolved to a notice");
            } else {
                error!(%err, "decision processing failed");
            }
        }
        result
    }

    /// Quick-intent variant: the action arrives as a URL parameter.
    pub fn decide_with_intent(
        &self,
        raw_token: &str,
        intent: &str,
        comment: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let action = DecisionAction::from_intent(intent)?;
        self.decide(raw_token, action, comment, ctx)
    }

    /// Per-recipient approval status for internal review screens.
    pub fn status_for(
        &self,
        permit_ids: &[String],
    ) -> Result<HashMap<String, PermitApprovalStatus>, ApprovalError> {
        let configured = self.recipients().list()?;
        StatusAggregator::new(&self.store).status_for(permit_ids, &configured)
    }

    /// Withdraw a pending permit. Its live links are invalidated with
    /// `PermitCancelled` in the same transaction as the status change.
    pub fn cancel_permit(&self, permit_id: &str, reason: &str) -> Result<Permit, ApprovalError> {
        let result = (&self.store.links, &self.store.permits).transaction(
            |(links, permits)| {
                let abort = |e: ApprovalError| ConflictableTransactionError::Abort(e);

                let bytes = permits
                    .get(permit_id.as_bytes())?
                    .ok_or(abort(ApprovalError::NotFound))?;
                let mut permit: Permit =
                    minicbor::decode(&bytes).map_err(|e| abort(e.into()))?;
                if !matches!(
                    permit.status,
                    PermitStatus::Draft | PermitStatus::PendingApproval
                ) {
                    return Err(abort(ApprovalError::InvalidState(permit.status)));
                }

                for link_id in &permit.link_ids {
                    let Some(bytes) = links.get(link_id.as_bytes())? else {
                        continue;
                    };
                    let mut link: ApprovalLink =
                        minicbor::decode(&bytes).map_err(|e| abort(e.into()))?;
                    if link.is_live() {
                        link.mark_used(UsedAction::PermitCancelled, None);
                        links.insert(
                            link.id.as_bytes(),
                            minicbor::to_vec(&link).map_err(|e| abort(e.into()))?,
                        )?;
                    }
                }

                permit.status = PermitStatus::Cancelled;
                permit.append_note(format!(
                    "cancelled at {}: {}",
                    TimeStamp::new().display(),
                    reason
                ));
                permits.insert(
                    permit.id.as_bytes(),
                    minicbor::to_vec(&permit).map_err(|e| abort(e.into()))?,
                )?;

                Ok(permit)
            },
        );

        let permit = match result {
            Ok(permit) => permit,
            Err(sled::transaction::TransactionError::Abort(e)) => return Err(e),
            Err(sled::transaction::TransactionError::Storage(e)) => {
                return Err(ApprovalError::Store(e));
            }
        };

        self.audit().append_logged(
            permit_id,
            EVENT_PERMIT_CANCELLED,
            "system",
            vec![("reason".to_string(), reason.to_string())],
        );
        info!(permit_id, "permit cancelled, live approval links invalidated");

        Ok(permit)
    }

    /// Explicitly re-arm notification for a still-pending permit, so a
    /// subsequent `submit_for_approval` re-sends fresh links.
    pub fn reset_notification(&self, permit_id: &str) -> Result<(), ApprovalError> {
        self.store.require_permit(permit_id)?;
        self.store.clear_notified(permit_id)
    }
}
