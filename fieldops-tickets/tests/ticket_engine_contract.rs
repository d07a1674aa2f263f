//! Contract-level tests for `TicketService` covering the create/take/close
//! lifecycle, the single-taker guarantee, and the payout/ledger invariants.

use std::sync::Arc;

use chrono::Utc;
use fieldops_access::AccessGate;
use fieldops_access::InMemoryAccessGate;
use fieldops_access::Percent;
use fieldops_access::PrivilegedIds;
use fieldops_access::Role;
use fieldops_audit::AuditLog;
use fieldops_audit::InMemoryAuditLog;
use fieldops_tickets::CloseRequest;
use fieldops_tickets::InMemoryTicketService;
use fieldops_tickets::NewTicketRequest;
use fieldops_tickets::TicketService;
use fieldops_tickets::TicketStatus;
use fieldops_tickets::TransferStatus;

async fn harness() -> (
    Arc<InMemoryAccessGate>,
    Arc<InMemoryAuditLog>,
    InMemoryTicketService,
) {
    let access = Arc::new(InMemoryAccessGate::new(PrivilegedIds::default()));
    let audit = Arc::new(InMemoryAuditLog::default());
    let tickets = InMemoryTicketService::new(access.clone(), audit.clone(), 5);
    (access, audit, tickets)
}

fn new_ticket_request() -> NewTicketRequest {
    NewTicketRequest {
        category: "plumbing".into(),
        client_phone: "+7 900 123-45-67".into(),
        client_address: Some("12 Example St".into()),
        scheduled_at: None,
        preferred_date_dm: None,
        problem_text: Some("leaking pipe".into()),
        special_note: None,
        ad_source: Some("avito".into()),
        is_repeat: false,
        repeat_ticket_ids: vec![],
        lead_id: None,
    }
}

#[tokio::test]
async fn create_requires_admin_like_role() {
    let (access, _audit, tickets) = harness().await;
    let master = access.ensure_actor(1, None, None).await.unwrap();
    access.set_role(1, Role::Master).await.unwrap();
    let master = access.get_user(master.id).await.unwrap();

    let err = tickets.create(new_ticket_request(), &master).await.unwrap_err();
    assert!(matches!(err, fieldops_tickets::TicketError::Denied(_)));
}

#[tokio::test]
async fn create_assigns_public_id_shaped_ddmmyynn() {
    let (access, _audit, tickets) = harness().await;
    let admin = access.ensure_actor(2, None, None).await.unwrap();
    access.set_role(2, Role::Admin).await.unwrap();
    let admin = access.get_user(admin.id).await.unwrap();

    let ticket = tickets.create(new_ticket_request(), &admin).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::ReadyForWork);
    assert_eq!(ticket.public_id.len(), 8);
    assert!(ticket.public_id.chars().all(|c| c.is_ascii_digit()));
    let today = Utc::now().format("%d%m%y").to_string();
    assert!(ticket.public_id.starts_with(&today));
}

#[tokio::test]
async fn only_one_concurrent_take_wins() {
    let (access, _audit, tickets) = harness().await;
    let admin = access.ensure_actor(2, None, None).await.unwrap();
    access.set_role(2, Role::Admin).await.unwrap();
    let admin = access.get_user(admin.id).await.unwrap();
    let ticket = tickets.create(new_ticket_request(), &admin).await.unwrap();

    let master_a = {
        access.ensure_actor(10, None, None).await.unwrap();
        access.set_role(10, Role::Master).await.unwrap();
        access.get_user(10).await.unwrap()
    };
    let master_b = {
        access.ensure_actor(11, None, None).await.unwrap();
        access.set_role(11, Role::Master).await.unwrap();
        access.get_user(11).await.unwrap()
    };

    let first = tickets.take(ticket.id, &master_a).await;
    let second = tickets.take(ticket.id, &master_b).await;

    assert!(first.is_ok());
    assert!(matches!(
        second.unwrap_err(),
        fieldops_tickets::TicketError::InvalidState(_)
    ));

    let current = tickets.get(ticket.id).await.unwrap();
    assert_eq!(current.assigned_executor_id, Some(master_a.id));
}

#[tokio::test]
async fn close_computes_payout_identity_and_appends_money_ops() {
    let (access, _audit, tickets) = harness().await;
    let admin = access.ensure_actor(2, None, None).await.unwrap();
    access.set_role(2, Role::Admin).await.unwrap();
    access
        .set_admin_percent(2, Some(Percent::from_decimal(10.0).unwrap()))
        .await
        .unwrap();
    let admin = access.get_user(admin.id).await.unwrap();

    let master = {
        access.ensure_actor(10, None, None).await.unwrap();
        access.set_role(10, Role::Master).await.unwrap();
        access
            .set_master_percent(10, Some(Percent::from_decimal(40.0).unwrap()))
            .await
            .unwrap();
        access.get_user(10).await.unwrap()
    };

    let ticket = tickets.create(new_ticket_request(), &admin).await.unwrap();
    tickets.take(ticket.id, &master).await.unwrap();
    tickets.set_in_progress(ticket.id, &master).await.unwrap();

    let closed = tickets
        .close(
            ticket.id,
            &master,
            CloseRequest {
                revenue_minor: 10_000,
                expense_minor: 1_000,
                junior_master_id: None,
                junior_percent: None,
                closed_comment: Some("done".into()),
                photos: vec!["file-1".into()],
            },
        )
        .await
        .unwrap();

    assert_eq!(closed.status, TicketStatus::Closed);
    let net_profit = closed.net_profit_minor.unwrap();
    let sum = closed.executor_earned_minor.unwrap()
        + closed.admin_earned_minor.unwrap()
        + closed.junior_earned_minor.unwrap_or(0)
        + closed.project_take_minor.unwrap();
    assert_eq!(sum, net_profit);

    let money_ops = tickets.money_operations(ticket.id).await.unwrap();
    assert_eq!(money_ops.len(), 2);
    let photos = tickets.close_photos(ticket.id).await.unwrap();
    assert_eq!(photos.len(), 1);
}

#[tokio::test]
async fn mark_transfer_sent_requires_executor() {
    let (access, _audit, tickets) = harness().await;
    let admin = access.ensure_actor(2, None, None).await.unwrap();
    access.set_role(2, Role::Admin).await.unwrap();
    let admin = access.get_user(admin.id).await.unwrap();
    let master = {
        access.ensure_actor(10, None, None).await.unwrap();
        access.set_role(10, Role::Master).await.unwrap();
        access.get_user(10).await.unwrap()
    };
    let other_master = {
        access.ensure_actor(11, None, None).await.unwrap();
        access.set_role(11, Role::Master).await.unwrap();
        access.get_user(11).await.unwrap()
    };

    let ticket = tickets.create(new_ticket_request(), &admin).await.unwrap();
    tickets.take(ticket.id, &master).await.unwrap();
    tickets.set_in_progress(ticket.id, &master).await.unwrap();
    tickets
        .close(
            ticket.id,
            &master,
            CloseRequest {
                revenue_minor: 5_000,
                expense_minor: 0,
                junior_master_id: None,
                junior_percent: None,
                closed_comment: None,
                photos: vec![],
            },
        )
        .await
        .unwrap();

    let denied = tickets.mark_transfer_sent(ticket.id, &other_master).await;
    assert!(denied.is_err());

    let sent = tickets.mark_transfer_sent(ticket.id, &master).await.unwrap();
    assert_eq!(sent.transfer_status, TransferStatus::Sent);
}

#[tokio::test]
async fn super_admin_can_reclose_and_ledger_adjusts_by_delta() {
    let (access, _audit, tickets) = harness().await;
    let admin = access.ensure_actor(2, None, None).await.unwrap();
    access.set_role(2, Role::Admin).await.unwrap();
    let admin = access.get_user(admin.id).await.unwrap();
    let master = {
        access.ensure_actor(10, None, None).await.unwrap();
        access.set_role(10, Role::Master).await.unwrap();
        access.get_user(10).await.unwrap()
    };
    let super_admin = {
        access.ensure_actor(20, None, None).await.unwrap();
        access.set_role(20, Role::SuperAdmin).await.unwrap();
        access.get_user(20).await.unwrap()
    };

    let ticket = tickets.create(new_ticket_request(), &admin).await.unwrap();
    tickets.take(ticket.id, &master).await.unwrap();
    tickets.set_in_progress(ticket.id, &master).await.unwrap();
    tickets
        .close(
            ticket.id,
            &master,
            CloseRequest {
                revenue_minor: 100_000,
                expense_minor: 25_000,
                junior_master_id: None,
                junior_percent: None,
                closed_comment: Some("first close".into()),
                photos: vec![],
            },
        )
        .await
        .unwrap();

    let denied = tickets
        .close(
            ticket.id,
            &master,
            CloseRequest {
                revenue_minor: 120_000,
                expense_minor: 30_000,
                junior_master_id: None,
                junior_percent: None,
                closed_comment: Some("executor tries to reclose".into()),
                photos: vec![],
            },
        )
        .await;
    assert!(matches!(denied, Err(fieldops_tickets::TicketError::Denied(_))));

    let reclosed = tickets
        .close(
            ticket.id,
            &super_admin,
            CloseRequest {
                revenue_minor: 120_000,
                expense_minor: 30_000,
                junior_master_id: None,
                junior_percent: None,
                closed_comment: Some("super admin override".into()),
                photos: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(reclosed.status, TicketStatus::Closed);
    assert_eq!(reclosed.revenue_minor, Some(120_000));

    let money_ops = tickets.money_operations(ticket.id).await.unwrap();
    let income_total: i64 = money_ops
        .iter()
        .filter(|op| op.op_type == fieldops_tickets::MoneyOpType::Income)
        .map(|op| op.amount_minor)
        .sum();
    let expense_total: i64 = money_ops
        .iter()
        .filter(|op| op.op_type == fieldops_tickets::MoneyOpType::Expense)
        .map(|op| op.amount_minor)
        .sum();
    assert_eq!(income_total - expense_total, 120_000 - 30_000);
}

#[tokio::test]
async fn cancel_is_recorded_with_previous_status() {
    let (access, audit, tickets) = harness().await;
    let admin = access.ensure_actor(2, None, None).await.unwrap();
    access.set_role(2, Role::Admin).await.unwrap();
    let admin = access.get_user(admin.id).await.unwrap();

    let ticket = tickets.create(new_ticket_request(), &admin).await.unwrap();
    let cancelled = tickets.cancel(ticket.id, &admin).await.unwrap();
    assert_eq!(cancelled.status, TicketStatus::Cancelled);

    let events = audit.ticket_events(ticket.id).await.unwrap();
    assert!(events.iter().any(|event| event.action == "TICKET_CANCELLED"));
}
