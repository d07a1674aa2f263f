use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fieldops_access::UserId;
use fieldops_audit::AuditLog;
use fieldops_audit::AuditPayload;
use fieldops_audit::NewAuditEvent;
use fieldops_tickets::normalize_ad_source;
use fieldops_tickets::normalize_phone;
use fieldops_tickets::normalize_ticket_category;
use fieldops_tickets::AdSource;
use fieldops_tickets::TicketId;
use tokio::sync::Mutex;
use tracing::info;
use tracing::warn;

use crate::Lead;
use crate::LeadError;
use crate::LeadId;
use crate::LeadRegistry;
use crate::LeadResult;
use crate::LeadStatus;
use crate::NewLeadPayload;

#[derive(Default)]
struct State {
    leads: HashMap<LeadId, Lead>,
}

pub struct InMemoryLeadRegistry {
    audit: Arc<dyn AuditLog>,
    state: Mutex<State>,
}

impl InMemoryLeadRegistry {
    #[must_use]
    pub fn new(audit: Arc<dyn AuditLog>) -> Self {
        Self {
            audit,
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl LeadRegistry for InMemoryLeadRegistry {
    async fn ingest(&self, external_id: LeadId, payload: NewLeadPayload) -> LeadResult<(Lead, bool)> {
        let mut guard = self.state.lock().await;
        if let Some(existing) = guard.leads.get(&external_id) {
            info!(external_id = %external_id, "duplicate lead ingest");
            return Ok((existing.clone(), true));
        }

        let phone = normalize_phone(&payload.phone).map_err(|err| LeadError::Validation(err.to_string()))?;
        let category = payload
            .category_hint
            .as_deref()
            .and_then(normalize_ticket_category);
        let ad_source = payload
            .source
            .as_deref()
            .and_then(normalize_ad_source)
            .unwrap_or(AdSource::Unknown);

        let now = Utc::now();
        let lead = Lead {
            external_id,
            status: LeadStatus::NewRaw,
            phone,
            name: payload.name,
            message: payload.message,
            category,
            ad_source,
            issue_title: payload.issue_title,
            scheduled_at: payload.scheduled_at,
            converted_ticket_id: None,
            created_at: now,
            updated_at: now,
        };
        guard.leads.insert(external_id, lead.clone());
        info!(external_id = %external_id, "lead ingested");
        Ok((lead, false))
    }

    async fn get(&self, external_id: LeadId) -> LeadResult<Lead> {
        let guard = self.state.lock().await;
        guard
            .leads
            .get(&external_id)
            .cloned()
            .ok_or(LeadError::NotFound(external_id))
    }

    async fn list(&self) -> LeadResult<Vec<Lead>> {
        let guard = self.state.lock().await;
        Ok(guard.leads.values().cloned().collect())
    }

    async fn set_status(&self, external_id: LeadId, status: LeadStatus, actor: UserId) -> LeadResult<Lead> {
        let mut guard = self.state.lock().await;
        let lead = guard
            .leads
            .get_mut(&external_id)
            .ok_or(LeadError::NotFound(external_id))?;
        if lead.status.is_final() {
            warn!(external_id = %external_id, status = %lead.status, "lead status change rejected: final");
            return Err(LeadError::InvalidState(external_id, lead.status));
        }
        let before = lead.status;
        lead.status = status;
        lead.updated_at = Utc::now();
        let after = lead.clone();
        drop(guard);

        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor),
                action: "LEAD_STATUS_UPDATED".to_string(),
                entity_type: "lead".to_string(),
                entity_id: Some(external_id.to_string()),
                payload: AuditPayload::transition(
                    serde_json::json!({"status": before.to_string()}),
                    serde_json::json!({"status": after.status.to_string()}),
                ),
            })
            .await;
        info!(external_id = %external_id, status = %after.status, "lead status updated");
        Ok(after)
    }

    async fn convert(&self, external_id: LeadId, ticket_id: TicketId, actor: UserId) -> LeadResult<Lead> {
        let mut guard = self.state.lock().await;
        let lead = guard
            .leads
            .get_mut(&external_id)
            .ok_or(LeadError::NotFound(external_id))?;
        if lead.status.is_final() {
            warn!(external_id = %external_id, status = %lead.status, "lead conversion rejected: final");
            return Err(LeadError::InvalidState(external_id, lead.status));
        }
        lead.status = LeadStatus::Converted;
        lead.converted_ticket_id = Some(ticket_id);
        lead.updated_at = Utc::now();
        let after = lead.clone();
        drop(guard);

        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor),
                action: "LEAD_CONVERTED".to_string(),
                entity_type: "lead".to_string(),
                entity_id: Some(external_id.to_string()),
                payload: AuditPayload::transition(
                    serde_json::Value::Null,
                    serde_json::json!({"converted_ticket_id": ticket_id}),
                ),
            })
            .await;
        info!(external_id = %external_id, ticket_id, "lead converted");
        Ok(after)
    }
}
