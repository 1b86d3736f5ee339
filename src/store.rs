//! Sled-backed persistence for approval links and permits.
//!
//! One tree per record kind. Link history is never deleted; the `links`
//! tree is append/update-only and the `token_index` tree gives O(1) lookup
//! from a token digest to its link id.

use crate::error::ApprovalError;
use crate::link::ApprovalLink;
use crate::permit::Permit;
use sled::{Batch, Tree};
use std::sync::Arc;

pub const LINKS_TREE: &str = "links";
pub const TOKEN_INDEX_TREE: &str = "token_index";
pub const PERMITS_TREE: &str = "permits";
pub const SETTINGS_TREE: &str = "settings";
pub const AUDIT_TREE: &str = "audit";

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, ApprovalError> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn decode<'b, T: minicbor::Decode<'b, ()>>(
    bytes: &'b [u8],
) -> Result<T, ApprovalError> {
    Ok(minicbor::decode(bytes)?)
}

pub struct Store {
    pub(crate) links: Tree,
    pub(crate) token_index: Tree,
    pub(crate) permits: Tree,
    pub(crate) settings: Tree,
    pub(crate) audit: Tree,
}

impl Store {
    pub fn open(db: &Arc<sled::Db>) -> Result<Self, ApprovalError> {
        Ok(Self {
            links: db.open_tree(LINKS_TREE)?,
            token_index: db.open_tree(TOKEN_INDEX_TREE)?,
            permits: db.open_tree(PERMITS_TREE)?,
            settings: db.open_tree(SETTINGS_TREE)?,
            audit: db.open_tree(AUDIT_TREE)?,
        })
    }

    pub fn insert_permit(&self, permit: &Permit) -> Result<(), ApprovalError> {
        self.permits
            .insert(permit.id.as_bytes(), encode(permit)?)?;
        Ok(())
    }

    pub fn get_permit(&self, permit_id: &str) -> Result<Option<Permit>, ApprovalError> {
        match self.permits.get(permit_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn require_permit(&self, permit_id: &str) -> Result<Permit, ApprovalError> {
        self.get_permit(permit_id)?.ok_or(ApprovalError::NotFound)
    }

    pub fn get_link(&self, link_id: &str) -> Result<Option<ApprovalLink>, ApprovalError> {
        match self.links.get(link_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve a token digest to its link, if any.
    pub fn link_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ApprovalLink>, ApprovalError> {
        let Some(link_id) = self.token_index.get(token_hash.as_bytes())? else {
            return Ok(None);
        };
        let link_id = String::from_utf8_lossy(&link_id).to_string();
        self.get_link(&link_id)
    }

    /// Full link history for a permit, in issuance order. Missing ids are a
    /// storage inconsistency and surface as `Codec`.
    pub fn links_for_permit(&self, permit: &Permit) -> Result<Vec<ApprovalLink>, ApprovalError> {
        let mut out = Vec::with_capacity(permit.link_ids.len());
        for link_id in &permit.link_ids {
            match self.get_link(link_id)? {
                Some(link) => out.push(link),
                None => {
                    return Err(ApprovalError::Codec(format!(
                        "permit {} references missing link {}",
                        permit.id, link_id
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Stage a link write into a batch applied atomically with the other
    /// staged link writes.
    pub fn stage_link(&self, batch: &mut Batch, link: &ApprovalLink) -> Result<(), ApprovalError> {
        batch.insert(link.id.as_bytes(), encode(link)?);
        Ok(())
    }

    pub fn apply_links(&self, batch: Batch) -> Result<(), ApprovalError> {
        self.links.apply_batch(batch)?;
        Ok(())
    }

    pub fn index_token(&self, token_hash: &str, link_id: &str) -> Result<(), ApprovalError> {
        self.token_index
            .insert(token_hash.as_bytes(), link_id.as_bytes())?;
        Ok(())
    }

    /// Flip the "already notified" guard. Touches only `notified_at` so a
    /// concurrent decision is never overwritten.
    pub fn set_notified(&self, permit_id: &str) -> Result<(), ApprovalError> {
        self.update_notified(permit_id, true)
    }

    pub fn clear_notified(&self, permit_id: &str) -> Result<(), ApprovalError> {
        self.update_notified(permit_id, false)
    }

    fn update_notified(&self, permit_id: &str, notified: bool) -> Result<(), ApprovalError> {
        self.permits.update_and_fetch(permit_id.as_bytes(), |old| {
            let old = old?;
            let mut permit: Permit = minicbor::decode(old).ok()?;
            permit.notified_at = notified.then(crate::types::TimeStamp::new);
            minicbor::to_vec(&permit).ok()
        })?;
        Ok(())
    }

    /// Atomically append a link id to a permit's history. Touches only
    /// `link_ids`, so a concurrent status transition is never overwritten.
    pub fn append_link_id(&self, permit_id: &str, link_id: &str) -> Result<(), ApprovalError> {
        let link_id = link_id.to_string();
        self.permits.update_and_fetch(permit_id.as_bytes(), |old| {
            let old = old?;
            let mut permit: Permit = minicbor::decode(old).ok()?;
            permit.link_ids.push(link_id.clone());
            minicbor::to_vec(&permit).ok()
        })?;
        Ok(())
    }
}
