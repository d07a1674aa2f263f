use std::sync::Arc;

use async_trait::async_trait;
use fieldops_access::AccessGate;
use fieldops_access::User;
use fieldops_access::UserId;
use fieldops_audit::AuditLog;
use fieldops_leads::LeadError;
use fieldops_leads::LeadId;
use fieldops_leads::LeadRegistry;
use fieldops_links::JuniorLinkRegistry;
use fieldops_links::LinkError;
use fieldops_links::ProjectShareRegistry;
use fieldops_settings::SettingsStore;
use fieldops_tickets::LeadConversionHook;
use fieldops_tickets::NewTicketRequest;
use fieldops_tickets::Ticket;
use fieldops_tickets::TicketError;
use fieldops_tickets::TicketId;
use fieldops_tickets::TicketService;
use thiserror::Error;

use crate::webhook;
use crate::FinanceAggregator;
use crate::Telemetry;
use crate::WebhookError;
use crate::WebhookOutcome;
use crate::webhook::LeadWebhookBody;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error(transparent)]
    Lead(#[from] LeadError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

/// Top-level composition root. Each field is a trait object so alternate
/// store implementations (e.g. a future `postgres-store`-backed one) can be
/// swapped in without touching this crate.
pub struct Platform {
    pub access: Arc<dyn AccessGate>,
    pub audit: Arc<dyn AuditLog>,
    pub tickets: Arc<dyn TicketService>,
    pub links: Arc<dyn JuniorLinkRegistry>,
    pub shares: Arc<dyn ProjectShareRegistry>,
    pub leads: Arc<dyn LeadRegistry>,
    pub settings: Arc<dyn SettingsStore>,
    pub telemetry: Telemetry,
    pub webhook_secret: Option<String>,
}

/// Bridges the ticket engine's create critical section to the lead registry
/// without making `fieldops-tickets` depend on `fieldops-leads`.
struct LeadConversionAdapter<'a> {
    leads: &'a dyn LeadRegistry,
    lead_id: LeadId,
    actor_id: UserId,
}

#[async_trait]
impl LeadConversionHook for LeadConversionAdapter<'_> {
    async fn mark_converted(&self, ticket_id: TicketId) -> Result<(), String> {
        self.leads
            .convert(self.lead_id, ticket_id, self.actor_id)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

impl Platform {
    #[must_use]
    pub fn finance(&self) -> FinanceAggregator {
        FinanceAggregator::new(self.tickets.clone(), self.shares.clone())
    }

    /// Creates a ticket paired with a lead and flips the lead to `CONVERTED`
    /// in the same critical section as the ticket insert (see
    /// `fieldops_tickets::LeadConversionHook`): if the lead flip fails, the
    /// ticket insert is rolled back, so the two never commit independently.
    pub async fn convert_lead_to_ticket(
        &self,
        lead_id: LeadId,
        mut request: NewTicketRequest,
        actor: &User,
    ) -> Result<Ticket, PlatformError> {
        request.lead_id = Some(lead_id);
        let hook = LeadConversionAdapter {
            leads: self.leads.as_ref(),
            lead_id,
            actor_id: actor.id,
        };
        let ticket = self.tickets.create_for_lead(request, actor, &hook).await?;
        self.telemetry.record_ticket_created();
        self.telemetry.record_lead_converted();
        Ok(ticket)
    }

    pub async fn handle_lead_webhook(
        &self,
        secret_header: Option<&str>,
        body: LeadWebhookBody,
    ) -> Result<WebhookOutcome, PlatformError> {
        let validated =
            webhook::handle_lead_webhook(self.webhook_secret.as_deref(), secret_header, body)?;
        let (_, duplicate) = self.leads.ingest(validated.external_id, validated.payload).await?;
        if !duplicate {
            self.telemetry.record_lead_ingested();
        }
        Ok(WebhookOutcome { ok: true, duplicate })
    }
}
