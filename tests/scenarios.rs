//! End-to-end scenarios for the approval engine.
//!
//! Sled uses file-based locking to prevent concurrent access, so each test
//! opens its own database under a tempdir for simplified cleanup.

use anyhow::Context;
use permit_approval::{
    audit::EVENT_EMAIL_ACTION,
    decision::DecisionAction,
    dispatch::{DispatchConfig, MemoryQueue},
    error::ApprovalError,
    issuer::LinkIssuer,
    link::UsedAction,
    permit::PermitStatus,
    service::ApprovalService,
    types::{DecisionSource, RequestContext},
};
use std::sync::Arc;
use tempfile::tempdir;

struct Fixture {
    service: ApprovalService,
    queue: Arc<MemoryQueue>,
    _dir: tempfile::TempDir,
}

fn fixture(name: &str) -> anyhow::Result<Fixture> {
    let dir = tempdir()?;
    let db = Arc::new(sled::open(dir.path().join(name))?);
    let queue = Arc::new(MemoryQueue::new());
    let service = ApprovalService::open(&db, queue.clone(), DispatchConfig::default())?;
    Ok(Fixture {
        service,
        queue,
        _dir: dir,
    })
}

/// Pull the raw token out of a queued message body.
fn extract_token(html_body: &str) -> String {
    let start = html_body
        .find("token=")
        .expect("message body carries a decision url")
        + "token=".len();
    html_body[start..start + 64].to_string()
}

fn ctx() -> RequestContext {
    RequestContext::new("203.0.113.7", "integration-test")
}

#[test]
fn happy_path_two_recipients() -> anyhow::Result<()> {
    let fx = fixture("happy_path.db")?;
    fx.service.recipients().add("Alice", "a@x.com")?;
    fx.service.recipients().add("Bob", "b@x.com")?;

    let permit = fx.service.create_permit("P-2024-001")?;
    let queued = fx
        .service
        .submit_for_approval(&permit.id)
        .context("submit for approval failed")?;
    assert_eq!(queued, 2);

    let messages = fx.queue.messages();
    assert_eq!(messages.len(), 2);
    let token_a = extract_token(&messages[0].html_body);
    let token_b = extract_token(&messages[1].html_body);
    assert_eq!(messages[0].to, "a@x.com");

    // Alice approves with a comment
    let outcome = fx
        .service
        .decide(&token_a, DecisionAction::Approve, Some("looks fine"), &ctx())?;
    assert_eq!(outcome.decision, UsedAction::Approved);
    assert_eq!(outcome.permit_ref, "P-2024-001");

    let decided = fx.service.permit(&permit.id)?;
    assert_eq!(decided.status, PermitStatus::Active);
    assert_eq!(decided.approved_by, None);
    assert_eq!(decided.decision_source, Some(DecisionSource::EmailLink));
    assert!(decided.approved_at.is_some());
    // the "already notified" flag is cleared post-commit
    assert!(decided.notified_at.is_none());

    // one attributed note line, cumulative with the submission note
    let decision_notes: Vec<_> = decided
        .approval_notes
        .iter()
        .filter(|n| n.contains("approved via emailed approval link"))
        .collect();
    assert_eq!(decision_notes.len(), 1);
    assert!(decision_notes[0].contains("a@x.com"));
    assert!(decision_notes[0].contains("looks fine"));

    // Bob's still-unused token can no longer decide anything
    let err = fx
        .service
        .decide(&token_b, DecisionAction::Reject, None, &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::AlreadyUsed(UsedAction::DecisionTaken)
    ));

    let links = fx.service.links_for_permit(&permit.id)?;
    let alice = links.iter().find(|l| l.recipient_email == "a@x.com").unwrap();
    let bob = links.iter().find(|l| l.recipient_email == "b@x.com").unwrap();
    assert_eq!(alice.used_action, Some(UsedAction::Approved));
    assert_eq!(alice.used_comment.as_deref(), Some("looks fine"));
    assert_eq!(bob.used_action, Some(UsedAction::DecisionTaken));

    // exactly one decision audit event
    let events = fx.service.audit().events_for(&permit.id)?;
    let decisions: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EVENT_EMAIL_ACTION)
        .collect();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].actor, "a@x.com");

    Ok(())
}

#[test]
fn rejection_path() -> anyhow::Result<()> {
    let fx = fixture("rejection.db")?;
    fx.service.recipients().add("Alice", "a@x.com")?;

    let permit = fx.service.create_permit("P-2024-002")?;
    fx.service.submit_for_approval(&permit.id)?;
    let token = extract_token(&fx.queue.messages()[0].html_body);

    let outcome = fx
        .service
        .decide_with_intent(&token, "reject", Some("missing paperwork"), &ctx())?;
    assert_eq!(outcome.decision, UsedAction::Rejected);

    let decided = fx.service.permit(&permit.id)?;
    assert_eq!(decided.status, PermitStatus::Rejected);
    assert_eq!(decided.decision_source, Some(DecisionSource::EmailLink));

    Ok(())
}

#[test]
fn expired_link_leaves_permit_unchanged() -> anyhow::Result<()> {
    let fx = fixture("expired.db")?;
    let recipient = fx.service.recipients().add("Alice", "a@x.com")?;

    let permit = fx.service.create_permit("P-2024-003")?;
    fx.service.submit_for_approval(&permit.id)?;

    // issue directly with a window that has already closed
    let issued = LinkIssuer::new(fx.service.store()).issue(
        &permit.id,
        &recipient,
        chrono::Duration::seconds(-1),
    )?;

    let err = fx
        .service
        .decide(&issued.raw_token, DecisionAction::Approve, None, &ctx())
        .unwrap_err();
    assert!(matches!(err, ApprovalError::Expired));

    let untouched = fx.service.permit(&permit.id)?;
    assert_eq!(untouched.status, PermitStatus::PendingApproval);
    assert!(untouched.approved_at.is_none());

    Ok(())
}

#[test]
fn renotification_is_guarded_by_flag() -> anyhow::Result<()> {
    let fx = fixture("renotify.db")?;
    fx.service.recipients().add("Alice", "a@x.com")?;

    let permit = fx.service.create_permit("P-2024-004")?;
    assert_eq!(fx.service.submit_for_approval(&permit.id)?, 1);

    // second call in the same state queues nothing
    assert_eq!(fx.service.submit_for_approval(&permit.id)?, 0);
    assert_eq!(fx.queue.messages().len(), 1);

    // explicit reset re-arms dispatch; the old link is superseded
    fx.service.reset_notification(&permit.id)?;
    assert_eq!(fx.service.submit_for_approval(&permit.id)?, 1);

    let messages = fx.queue.messages();
    assert_eq!(messages.len(), 2);
    let old_token = extract_token(&messages[0].html_body);
    let new_token = extract_token(&messages[1].html_body);

    let err = fx
        .service
        .decide(&old_token, DecisionAction::Approve, None, &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::AlreadyUsed(UsedAction::Superseded)
    ));

    // only the newest token works
    let outcome = fx
        .service
        .decide(&new_token, DecisionAction::Approve, None, &ctx())?;
    assert_eq!(outcome.decision, UsedAction::Approved);

    Ok(())
}

#[test]
fn decision_applies_exactly_once_under_concurrency() -> anyhow::Result<()> {
    let fx = fixture("exactly_once.db")?;
    fx.service.recipients().add("Alice", "a@x.com")?;

    let permit = fx.service.create_permit("P-2024-005")?;
    fx.service.submit_for_approval(&permit.id)?;
    let token = extract_token(&fx.queue.messages()[0].html_body);

    let service = Arc::new(fx.service);
    let mut handles = vec![];
    for _ in 0..2 {
        let service = service.clone();
        let token = token.clone();
        handles.push(std::thread::spawn(move || {
            service.decide(&token, DecisionAction::Approve, None, &RequestContext::default())
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok_count, 1);
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, ApprovalError::AlreadyUsed(_)));
        }
    }

    // exactly one state transition, one used_at write, one audit event
    let decided = service.permit(&permit.id)?;
    assert_eq!(decided.status, PermitStatus::Active);
    let links = service.links_for_permit(&permit.id)?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].used_action, Some(UsedAction::Approved));

    let events = service.audit().events_for(&permit.id)?;
    let decisions = events
        .iter()
        .filter(|e| e.event_type == EVENT_EMAIL_ACTION)
        .count();
    assert_eq!(decisions, 1);

    let decision_notes = decided
        .approval_notes
        .iter()
        .filter(|n| n.contains("approved via emailed approval link"))
        .count();
    assert_eq!(decision_notes, 1);

    Ok(())
}

#[test]
fn cancelling_a_pending_permit_invalidates_its_links() -> anyhow::Result<()> {
    let fx = fixture("cancel.db")?;
    fx.service.recipients().add("Alice", "a@x.com")?;

    let permit = fx.service.create_permit("P-2024-006")?;
    fx.service.submit_for_approval(&permit.id)?;
    let token = extract_token(&fx.queue.messages()[0].html_body);

    let cancelled = fx.service.cancel_permit(&permit.id, "withdrawn by applicant")?;
    assert_eq!(cancelled.status, PermitStatus::Cancelled);

    let err = fx
        .service
        .decide(&token, DecisionAction::Approve, None, &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::AlreadyUsed(UsedAction::PermitCancelled)
    ));

    // a cancelled permit cannot re-enter the approval flow
    let err = fx.service.submit_for_approval(&permit.id).unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidState(PermitStatus::Cancelled)));

    Ok(())
}

#[test]
fn unknown_token_is_not_found() -> anyhow::Result<()> {
    let fx = fixture("unknown_token.db")?;

    let err = fx
        .service
        .decide(&"0".repeat(64), DecisionAction::Approve, None, &ctx())
        .unwrap_err();
    assert!(matches!(err, ApprovalError::NotFound));

    Ok(())
}
