//! Link issuance: supersede-then-insert for a (permit, recipient) pair

use crate::error::ApprovalError;
use crate::link::{ApprovalLink, LinkMetadata, UsedAction};
use crate::recipients::Recipient;
use crate::store::Store;
use crate::types::TimeStamp;
use crate::{token, utils};
use chrono::Duration;
use sled::Batch;
use tracing::info;

/// Default link lifetime: 7 days.
pub fn default_ttl() -> Duration {
    Duration::days(7)
}

/// The raw token leaves the engine exactly once, through this struct.
#[derive(Debug)]
pub struct IssuedLink {
    pub link_id: String,
    pub raw_token: String,
    pub expires_at: TimeStamp<chrono::Utc>,
}

pub struct LinkIssuer<'a> {
    store: &'a Store,
}

impl<'a> LinkIssuer<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Issue a fresh link for `(permit, recipient)`, superseding any link
    /// still live for that pair. Re-sending is therefore always safe: only
    /// the newest token works.
    pub fn issue(
        &self,
        permit_id: &str,
        recipient: &Recipient,
        ttl: Duration,
    ) -> Result<IssuedLink, ApprovalError> {
        let permit = self.store.require_permit(permit_id)?;
        let expires_at = TimeStamp::new().offset(ttl);

        let mut batch = Batch::default();
        let mut superseded = 0usize;
        for mut link in self.store.links_for_permit(&permit)? {
            if link.is_live() && link.matches_recipient(&recipient.email) {
                link.mark_used(UsedAction::Superseded, None);
                self.store.stage_link(&mut batch, &link)?;
                superseded += 1;
            }
        }

        let (raw_token, token_hash) = token::generate();
        let link = ApprovalLink {
            id: utils::new_uuid_to_bech32("link_")
                .map_err(|e| ApprovalError::Codec(e.to_string()))?,
            permit_id: permit.id.clone(),
            recipient_email: recipient.email.to_lowercase(),
            recipient_name: recipient.name.clone(),
            token_hash: token_hash.clone(),
            expires_at: expires_at.clone(),
            used_at: None,
            used_action: None,
            used_comment: None,
            metadata: LinkMetadata {
                recipient_id: Some(recipient.id.clone()),
                permit_ref: Some(permit.reference.clone()),
                ..LinkMetadata::default()
            },
            created_at: TimeStamp::new(),
        };
        self.store.stage_link(&mut batch, &link)?;
        self.store.apply_links(batch)?;
        // the permit must know the link before its token can resolve, so a
        // decision racing this issuance always sees a complete history
        self.store.append_link_id(&permit.id, &link.id)?;
        self.store.index_token(&token_hash, &link.id)?;

        info!(
            permit_id = %permit.id,
            link_id = %link.id,
            recipient = %link.recipient_email,
            superseded,
            "approval link issued"
        );

        Ok(IssuedLink {
            link_id: link.id,
            raw_token,
            expires_at,
        })
    }
}
