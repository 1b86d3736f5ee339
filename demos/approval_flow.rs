//! Walks a permit through the full emailed-approval flow against a local
//! sled database: configure recipients, submit, click the quick-approve
//! link, inspect the per-recipient status.

use permit_approval::{
    dispatch::{DispatchConfig, MemoryQueue},
    service::ApprovalService,
    types::RequestContext,
};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let db = Arc::new(sled::open("approval-demo-db")?);
    db.clear()?;

    let queue = Arc::new(MemoryQueue::new());
    let service = ApprovalService::open(&db, queue.clone(), DispatchConfig::default())?;

    service.recipients().add("Alice Planner", "alice@example.org")?;
    service.recipients().add("Bob Inspector", "bob@example.org")?;

    let permit = service.create_permit("P-2026-0042")?;
    let queued = service.submit_for_approval(&permit.id)?;
    println!("queued {queued} approval notifications");

    // pull the raw token out of the first queued message, as the recipient's
    // mail client would
    let message = &queue.messages()[0];
    let start = message.html_body.find("token=").unwrap() + "token=".len();
    let token = &message.html_body[start..start + 64];

    let ctx = RequestContext::new("192.0.2.10", "demo-client");
    let outcome = service.decide_with_intent(token, "approve", Some("all in order"), &ctx)?;
    println!("decision: {:?} on {}", outcome.decision, outcome.permit_ref);

    let statuses = service.status_for(&[permit.id.clone()])?;
    for recipient in &statuses[&permit.id].recipients {
        println!("{} <{}>: {:?}", recipient.name, recipient.email, recipient.state);
    }

    for event in service.audit().events_for(&permit.id)? {
        println!("audit: {} by {}", event.event_type, event.actor);
    }

    Ok(())
}
