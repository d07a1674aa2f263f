#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Idempotent intake for inbound inquiries, ahead of them becoming tickets.
//! A lead is identified by an externally-minted UUID (the webhook caller's
//! idempotency key), not an internal sequence.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use fieldops_access::UserId;
use fieldops_tickets::AdSource;
use fieldops_tickets::TicketCategory;
use fieldops_tickets::TicketId;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

mod memory;

pub use memory::InMemoryLeadRegistry;

pub type LeadId = Uuid;
pub type LeadResult<T> = Result<T, LeadError>;

#[derive(Debug, Error)]
pub enum LeadError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("lead {0} is already {1} and cannot transition")]
    InvalidState(LeadId, LeadStatus),
    #[error("lead {0} was not found")]
    NotFound(LeadId),
    #[error("infra error: {0}")]
    Infra(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadStatus {
    NewRaw,
    NeedInfo,
    Converted,
    Spam,
}

impl LeadStatus {
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, LeadStatus::Converted | LeadStatus::Spam)
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LeadStatus::NewRaw => "NEW_RAW",
            LeadStatus::NeedInfo => "NEED_INFO",
            LeadStatus::Converted => "CONVERTED",
            LeadStatus::Spam => "SPAM",
        };
        f.write_str(label)
    }
}

/// Raw inbound payload, as handed in from a webhook body (see `handle_lead_webhook`
/// in the API facade) or a manual entry form. Free-text `category`/`source` are
/// normalized at ingest time; unrecognized tokens fall back to `None`/`Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLeadPayload {
    pub phone: String,
    pub message: String,
    pub name: Option<String>,
    pub source: Option<String>,
    pub category_hint: Option<String>,
    pub issue_title: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
    pub external_id: LeadId,
    pub status: LeadStatus,
    pub phone: String,
    pub name: Option<String>,
    pub message: String,
    pub category: Option<TicketCategory>,
    pub ad_source: AdSource,
    pub issue_title: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub converted_ticket_id: Option<TicketId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field map a ticket-creation form can be pre-populated from. Pure projection
/// of `Lead`, no side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketPrefill {
    pub phone: String,
    pub name: Option<String>,
    pub problem_text: String,
    pub special_note: Option<String>,
    pub ad_source: AdSource,
    pub category: Option<TicketCategory>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[must_use]
pub fn build_ticket_prefill(lead: &Lead) -> TicketPrefill {
    TicketPrefill {
        phone: lead.phone.clone(),
        name: lead.name.clone(),
        problem_text: lead.message.clone(),
        special_note: lead.issue_title.clone(),
        ad_source: lead.ad_source,
        category: lead.category,
        scheduled_at: lead.scheduled_at,
    }
}

#[async_trait]
pub trait LeadRegistry: Send + Sync {
    /// Idempotent upsert keyed by `external_id`. First sighting creates a
    /// `NEW_RAW` lead; a repeat returns the existing row unchanged along with
    /// a flag the caller uses to answer the webhook's `duplicate` field.
    async fn ingest(&self, external_id: LeadId, payload: NewLeadPayload) -> LeadResult<(Lead, bool)>;

    async fn get(&self, external_id: LeadId) -> LeadResult<Lead>;

    async fn list(&self) -> LeadResult<Vec<Lead>>;

    async fn set_status(&self, external_id: LeadId, status: LeadStatus, actor: UserId) -> LeadResult<Lead>;

    /// Flips the lead to `CONVERTED` and records `converted_ticket_id`. The
    /// facade layer calls this from inside the ticket engine's create
    /// critical section (via `fieldops_tickets::LeadConversionHook`), which
    /// rolls the ticket insert back if this call fails — so a ticket can
    /// never exist without its paired lead having converted.
    async fn convert(&self, external_id: LeadId, ticket_id: TicketId, actor: UserId) -> LeadResult<Lead>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefill_copies_message_into_problem_text() {
        let lead = Lead {
            external_id: Uuid::new_v4(),
            status: LeadStatus::NewRaw,
            phone: "79991234567".into(),
            name: Some("Jordan".into()),
            message: "Leaking faucet".into(),
            category: Some(TicketCategory::Plumbing),
            ad_source: AdSource::Avito,
            issue_title: Some("Urgent".into()),
            scheduled_at: None,
            converted_ticket_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let prefill = build_ticket_prefill(&lead);
        assert_eq!(prefill.problem_text, "Leaking faucet");
        assert_eq!(prefill.category, Some(TicketCategory::Plumbing));
    }

    #[test]
    fn final_statuses_reported_correctly() {
        assert!(LeadStatus::Converted.is_final());
        assert!(LeadStatus::Spam.is_final());
        assert!(!LeadStatus::NewRaw.is_final());
        assert!(!LeadStatus::NeedInfo.is_final());
    }
}
