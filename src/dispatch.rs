//! Notification dispatch: issue links for every configured recipient and
//! hand rendered messages to the email queue.
//!
//! Delivery (drivers, retry) is the queue's concern; this module only
//! composes and enqueues. Per-recipient failures are logged and skipped so
//! one bad address never blocks the others.

use crate::audit::{AuditLog, EVENT_NOTIFICATIONS_SENT};
use crate::error::ApprovalError;
use crate::issuer::{IssuedLink, LinkIssuer, default_ttl};
use crate::permit::{Permit, PermitStatus};
use crate::recipients::{Recipient, RecipientDirectory};
use crate::store::Store;
use crate::types::TimeStamp;
use chrono::Duration;
use std::sync::Mutex;
use tracing::{info, warn};

/// Outbound message handoff. The engine never sends mail itself.
pub trait EmailQueue {
    fn enqueue(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<String>;
}

/// Capturing queue used by tests and local development.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    sent: Mutex<Vec<QueuedEmail>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn messages(&self) -> Vec<QueuedEmail> {
        self.sent.lock().expect("queue mutex poisoned").clone()
    }
}

impl EmailQueue for MemoryQueue {
    fn enqueue(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<String> {
        let queue_id = crate::utils::new_uuid_to_bech32("msg_")?;
        self.sent.lock().expect("queue mutex poisoned").push(QueuedEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(queue_id)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Public base URL the decision endpoint is reachable under.
    pub base_url: String,
    pub link_ttl: Duration,
    pub template_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            link_ttl: default_ttl(),
            template_name: "approval_request".to_string(),
        }
    }
}

/// The three URLs embedded per message. Quick variants pre-select the
/// action so the first click lands on a one-step confirmation page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionUrls {
    pub decision_url: String,
    pub quick_approve_url: String,
    pub quick_reject_url: String,
}

impl DecisionUrls {
    pub fn compose(base_url: &str, raw_token: &str) -> Self {
        let decision_url = format!(
            "{}/approval/decide?token={}",
            base_url.trim_end_matches('/'),
            raw_token
        );
        Self {
            quick_approve_url: format!("{decision_url}&intent=approve"),
            quick_reject_url: format!("{decision_url}&intent=reject"),
            decision_url,
        }
    }
}

fn render_message(
    permit: &Permit,
    recipient: &Recipient,
    urls: &DecisionUrls,
    expires_at: &TimeStamp<chrono::Utc>,
) -> (String, String) {
    let subject = format!("Approval requested: permit {}", permit.reference);
    let html_body = format!(
        "<p>Dear {},</p>\
         <p>Permit <strong>{}</strong> is awaiting your decision.</p>\
         <p><a href=\"{}\">Review and decide</a></p>\
         <p><a href=\"{}\">Approve</a> | <a href=\"{}\">Reject</a></p>\
         <p>This link expires on {}.</p>",
        recipient.name,
        permit.reference,
        urls.decision_url,
        urls.quick_approve_url,
        urls.quick_reject_url,
        expires_at.display(),
    );
    (subject, html_body)
}

pub struct NotificationDispatcher<'a> {
    store: &'a Store,
    queue: &'a dyn EmailQueue,
    config: &'a DispatchConfig,
}

impl<'a> NotificationDispatcher<'a> {
    pub fn new(store: &'a Store, queue: &'a dyn EmailQueue, config: &'a DispatchConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Notify every configured recipient that a permit awaits approval.
    /// Returns how many messages were queued. Guarded so repeated saves in
    /// the same state cannot cause a notification storm.
    pub fn notify_pending(&self, permit_id: &str) -> Result<usize, ApprovalError> {
        let permit = self.store.require_permit(permit_id)?;
        if permit.status != PermitStatus::PendingApproval {
            info!(permit_id, status = ?permit.status, "skipping notification, permit not pending");
            return Ok(0);
        }
        if permit.notified_at.is_some() {
            info!(permit_id, "skipping notification, recipients already notified");
            return Ok(0);
        }

        let recipients = RecipientDirectory::new(self.store).list()?;
        if recipients.is_empty() {
            warn!(permit_id, "no approval recipients configured");
            return Ok(0);
        }

        let issuer = LinkIssuer::new(self.store);
        let mut notified: Vec<String> = vec![];
        for recipient in &recipients {
            match self.notify_one(&permit, recipient, &issuer) {
                Ok(()) => notified.push(recipient.email.clone()),
                Err(err) => {
                    warn!(
                        permit_id,
                        recipient = %recipient.email,
                        %err,
                        "failed to notify approval recipient"
                    );
                }
            }
        }

        if !notified.is_empty() {
            self.store.set_notified(permit_id)?;
            AuditLog::new(self.store).append_logged(
                permit_id,
                EVENT_NOTIFICATIONS_SENT,
                "system",
                vec![
                    ("recipients".to_string(), notified.join(", ")),
                    ("template".to_string(), self.config.template_name.clone()),
                ],
            );
            info!(permit_id, queued = notified.len(), "approval notifications queued");
        }

        Ok(notified.len())
    }

    fn notify_one(
        &self,
        permit: &Permit,
        recipient: &Recipient,
        issuer: &LinkIssuer,
    ) -> anyhow::Result<()> {
        let IssuedLink {
            raw_token,
            expires_at,
            ..
        } = issuer.issue(&permit.id, recipient, self.config.link_ttl)?;

        let urls = DecisionUrls::compose(&self.config.base_url, &raw_token);
        let (subject, html_body) = render_message(permit, recipient, &urls, &expires_at);
        self.queue.enqueue(&recipient.email, &subject, &html_body)?;
        Ok(())
    }
}
