//! End-to-end wiring tests over `Platform`: lead ingest through webhook,
//! conversion into a ticket, and the finance aggregator reading the result.

use std::sync::Arc;

use fieldops_access::AccessGate;
use fieldops_access::InMemoryAccessGate;
use fieldops_access::PrivilegedIds;
use fieldops_access::Role;
use fieldops_api::Platform;
use fieldops_api::Telemetry;
use fieldops_audit::InMemoryAuditLog;
use fieldops_leads::InMemoryLeadRegistry;
use fieldops_links::InMemoryLinkRegistry;
use fieldops_settings::InMemorySettingsStore;
use fieldops_tickets::DateRange;
use fieldops_tickets::InMemoryTicketService;
use fieldops_tickets::NewTicketRequest;
use fieldops_tickets::TicketService;

async fn platform() -> (Arc<InMemoryAccessGate>, Platform) {
    let access = Arc::new(InMemoryAccessGate::new(PrivilegedIds::default()));
    let audit = Arc::new(InMemoryAuditLog::default());
    let links = Arc::new(InMemoryLinkRegistry::new(access.clone(), audit.clone()));
    let platform = Platform {
        access: access.clone(),
        audit: audit.clone(),
        tickets: Arc::new(InMemoryTicketService::new(access.clone(), audit.clone(), 5)),
        links: links.clone(),
        shares: links,
        leads: Arc::new(InMemoryLeadRegistry::new(audit)),
        settings: Arc::new(InMemorySettingsStore::new()),
        telemetry: Telemetry::new(),
        webhook_secret: Some("s3cr3t".into()),
    };
    (access, platform)
}

#[tokio::test]
async fn webhook_ingest_then_convert_then_finance() {
    let (access, platform) = platform().await;
    let admin = access.ensure_actor(1, None, None).await.unwrap();
    access.set_role(admin.id, Role::Admin).await.unwrap();
    let admin = access.get_user(1).await.unwrap();

    let external_id = uuid::Uuid::new_v4();
    let body = fieldops_api::LeadWebhookBody {
        external_id,
        ts: chrono::Utc::now(),
        phone: "+7 999 123-45-67".into(),
        message: "Leaking faucet".into(),
        name: Some("Jordan".into()),
        source: Some("avito".into()),
        category_id: None,
        category_title: Some("plumbing".into()),
        issue_title: None,
        ip: None,
        ua: None,
    };
    let outcome = platform
        .handle_lead_webhook(Some("s3cr3t"), body.clone())
        .await
        .unwrap();
    assert!(outcome.ok);
    assert!(!outcome.duplicate);

    let duplicate_outcome = platform.handle_lead_webhook(Some("s3cr3t"), body).await.unwrap();
    assert!(duplicate_outcome.duplicate);

    let request = NewTicketRequest {
        category: "plumbing".into(),
        client_phone: "+7 999 123-45-67".into(),
        client_address: None,
        scheduled_at: None,
        preferred_date_dm: None,
        problem_text: Some("Leaking faucet".into()),
        special_note: None,
        ad_source: Some("avito".into()),
        is_repeat: false,
        repeat_ticket_ids: Vec::new(),
        lead_id: None,
    };
    let ticket = platform
        .convert_lead_to_ticket(external_id, request, &admin)
        .await
        .unwrap();
    assert_eq!(ticket.lead_id, Some(external_id));

    let lead = platform.leads.get(external_id).await.unwrap();
    assert_eq!(lead.converted_ticket_id, Some(ticket.id));

    let summary = platform.finance().project_summary(DateRange::default()).await.unwrap();
    assert_eq!(summary.closed_count, 0);
}

#[tokio::test]
async fn converting_an_already_converted_lead_rolls_back_the_ticket_insert() {
    let (access, platform) = platform().await;
    let admin = access.ensure_actor(1, None, None).await.unwrap();
    access.set_role(admin.id, Role::Admin).await.unwrap();
    let admin = access.get_user(1).await.unwrap();

    let external_id = uuid::Uuid::new_v4();
    let body = fieldops_api::LeadWebhookBody {
        external_id,
        ts: chrono::Utc::now(),
        phone: "+7 999 123-45-67".into(),
        message: "Leaking faucet".into(),
        name: Some("Jordan".into()),
        source: Some("avito".into()),
        category_id: None,
        category_title: Some("plumbing".into()),
        issue_title: None,
        ip: None,
        ua: None,
    };
    platform
        .handle_lead_webhook(Some("s3cr3t"), body)
        .await
        .unwrap();

    let request = || NewTicketRequest {
        category: "plumbing".into(),
        client_phone: "+7 999 123-45-67".into(),
        client_address: None,
        scheduled_at: None,
        preferred_date_dm: None,
        problem_text: Some("Leaking faucet".into()),
        special_note: None,
        ad_source: Some("avito".into()),
        is_repeat: false,
        repeat_ticket_ids: Vec::new(),
        lead_id: None,
    };

    let first = platform
        .convert_lead_to_ticket(external_id, request(), &admin)
        .await
        .unwrap();

    let second = platform
        .convert_lead_to_ticket(external_id, request(), &admin)
        .await;
    assert!(second.is_err());

    let all = platform.tickets.list().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, first.id);
}
