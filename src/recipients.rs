//! Recipient configuration store.
//!
//! The configured recipient list lives JSON-encoded under a single settings
//! key, deduplicated case-insensitively by email. Admin screens manage it;
//! this engine consumes it read-mostly.

use crate::error::ApprovalError;
use crate::store::Store;
use crate::utils;
use serde::{Deserialize, Serialize};

const SETTINGS_KEY: &str = "approval_recipients";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String, // bech32-encoded uuid7, "rcpt_1..."
    pub name: String,
    pub email: String, // stored lowercased
}

pub struct RecipientDirectory<'a> {
    store: &'a Store,
}

fn validate_email(email: &str) -> Result<String, ApprovalError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(ApprovalError::Validation(format!(
            "invalid recipient email: {email}"
        )));
    }
    Ok(email)
}

impl<'a> RecipientDirectory<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Result<Vec<Recipient>, ApprovalError> {
        match self.store.settings.get(SETTINGS_KEY.as_bytes())? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| ApprovalError::Codec(e.to_string()))
            }
            None => Ok(vec![]),
        }
    }

    fn save(&self, recipients: &[Recipient]) -> Result<(), ApprovalError> {
        let bytes =
            serde_json::to_vec(recipients).map_err(|e| ApprovalError::Codec(e.to_string()))?;
        self.store.settings.insert(SETTINGS_KEY.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn add(&self, name: &str, email: &str) -> Result<Recipient, ApprovalError> {
        let email = validate_email(email)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ApprovalError::Validation("recipient name is empty".into()));
        }

        let mut recipients = self.list()?;
        if recipients.iter().any(|r| r.email == email) {
            return Err(ApprovalError::Validation(format!(
                "recipient already configured: {email}"
            )));
        }

        let recipient = Recipient {
            id: utils::new_uuid_to_bech32("rcpt_")
                .map_err(|e| ApprovalError::Validation(e.to_string()))?,
            name: name.to_string(),
            email,
        };
        recipients.push(recipient.clone());
        self.save(&recipients)?;

        Ok(recipient)
    }

    pub fn update(&self, id: &str, name: &str, email: &str) -> Result<Recipient, ApprovalError> {
        let email = validate_email(email)?;
        let mut recipients = self.list()?;

        if recipients.iter().any(|r| r.id != id && r.email == email) {
            return Err(ApprovalError::Validation(format!(
                "another recipient already uses: {email}"
            )));
        }

        let entry = recipients
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(ApprovalError::NotFound)?;
        entry.name = name.trim().to_string();
        entry.email = email;
        let updated = entry.clone();

        self.save(&recipients)?;
        Ok(updated)
    }

    pub fn remove(&self, id: &str) -> Result<(), ApprovalError> {
        let mut recipients = self.list()?;
        let before = recipients.len();
        recipients.retain(|r| r.id != id);
        if recipients.len() == before {
            return Err(ApprovalError::NotFound);
        }
        self.save(&recipients)
    }
}
