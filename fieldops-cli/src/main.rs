use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use fieldops_access::InMemoryAccessGate;
use fieldops_access::PrivilegedIds;
use fieldops_access::Role;
use fieldops_api::Platform;
use fieldops_api::Telemetry;
use fieldops_audit::InMemoryAuditLog;
use fieldops_leads::InMemoryLeadRegistry;
use fieldops_links::InMemoryLinkRegistry;
use fieldops_settings::InMemorySettingsStore;
use fieldops_tickets::CloseRequest;
use fieldops_tickets::DateRange;
use fieldops_tickets::InMemoryTicketService;
use fieldops_tickets::NewTicketRequest;

#[derive(Debug, Parser)]
#[command(name = "fieldops", about = "Field-service dispatch platform demo CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Seed an in-memory platform and walk a lead through intake, ticket
    /// creation, assignment, close, and transfer confirmation.
    Demo,

    /// Run the same seeded walkthrough as `demo`, then print the resulting
    /// project finance summary.
    Finance,
}

async fn build_platform() -> (Arc<InMemoryAccessGate>, Platform) {
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
        webhook_secret: Some("demo-secret".into()),
    };
    (access, platform)
}

struct Walkthrough {
    platform: Platform,
    ticket_id: fieldops_tickets::TicketId,
}

async fn run_walkthrough() -> Result<Walkthrough> {
    let (access, platform) = build_platform().await;

    let admin = access.ensure_actor(1, Some("Dana".into()), Some("dana".into())).await?;
    access.set_role(admin.id, Role::Admin).await?;
    let admin = access.get_user(admin.id).await?;

    let master = access.ensure_actor(2, Some("Priya".into()), Some("priya".into())).await?;
    access.set_role(master.id, Role::Master).await?;
    let master = access.get_user(master.id).await?;

    let super_admin = access
        .ensure_actor(3, Some("Sam".into()), Some("sam".into()))
        .await?;
    access.set_role(super_admin.id, Role::SuperAdmin).await?;
    let super_admin = access.get_user(super_admin.id).await?;

    let external_id = uuid::Uuid::new_v4();
    platform
        .handle_lead_webhook(
            Some("demo-secret"),
            fieldops_api::LeadWebhookBody {
                external_id,
                ts: chrono::Utc::now(),
                phone: "+7 999 123-45-67".into(),
                message: "Leaking faucet in the kitchen".into(),
                name: Some("Jordan".into()),
                source: Some("avito".into()),
                category_id: None,
                category_title: Some("plumbing".into()),
                issue_title: None,
                ip: None,
                ua: None,
            },
        )
        .await
        .context("webhook intake failed")?;

    let ticket = platform
        .convert_lead_to_ticket(
            external_id,
            NewTicketRequest {
                category: "plumbing".into(),
                client_phone: "+7 999 123-45-67".into(),
                client_address: Some("12 Birch St".into()),
                scheduled_at: None,
                preferred_date_dm: None,
                problem_text: Some("Leaking faucet in the kitchen".into()),
                special_note: None,
                ad_source: Some("avito".into()),
                is_repeat: false,
                repeat_ticket_ids: Vec::new(),
                lead_id: None,
            },
            &admin,
        )
        .await
        .context("lead conversion failed")?;

    platform.tickets.take(ticket.id, &master).await.context("take failed")?;
    platform
        .tickets
        .set_in_progress(ticket.id, &master)
        .await
        .context("set_in_progress failed")?;
    platform
        .tickets
        .close(
            ticket.id,
            &master,
            CloseRequest {
                revenue_minor: 8_000_00,
                expense_minor: 1_200_00,
                junior_master_id: None,
                junior_percent: None,
                closed_comment: Some("Replaced the cartridge.".into()),
                photos: vec!["photo-1.jpg".into()],
            },
        )
        .await
        .context("close failed")?;
    platform
        .tickets
        .mark_transfer_sent(ticket.id, &master)
        .await
        .context("mark_transfer_sent failed")?;
    platform
        .tickets
        .confirm_transfer(ticket.id, &super_admin, true)
        .await
        .context("confirm_transfer failed")?;

    Ok(Walkthrough { platform, ticket_id: ticket.id })
}

async fn run_demo() -> Result<()> {
    let Walkthrough { platform, ticket_id } = run_walkthrough().await?;
    let ticket = platform.tickets.get(ticket_id).await?;
    println!("Created ticket {} ({:?})", ticket.public_id, ticket.status);
    println!(
        "Executor earned {:?} minor units, net profit {:?} minor units",
        ticket.executor_earned_minor, ticket.net_profit_minor
    );
    println!("Transfer status: {:?}", ticket.transfer_status);
    println!("Run `fieldops finance` to see the project summary.");
    Ok(())
}

async fn run_finance() -> Result<()> {
    let Walkthrough { platform, .. } = run_walkthrough().await?;
    let summary = platform.finance().project_summary(DateRange::default()).await?;
    println!("Closed tickets: {}", summary.closed_count);
    println!("Confirmed transfers: {}", summary.confirmed_count);
    println!(
        "Net profit should/received (minor units): {}/{}",
        summary.tickets_net_profit_should_minor, summary.tickets_net_profit_received_minor
    );
    println!(
        "Executor/admin/junior earned (minor units): {}/{}/{}",
        summary.earned_executor_minor, summary.earned_admin_minor, summary.earned_junior_minor
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fieldops_api::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo => run_demo().await,
        Command::Finance => run_finance().await,
    }
}
