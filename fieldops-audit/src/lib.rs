#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Append-only, hash-chained recorder for ticket history and the generic
//! audit trail. Two independent chains back the two persisted tables from
//! the data model: `ticket_events` (keyed by ticket) and `audit_events`
//! (keyed by entity_type/entity_id, and the only place denials land).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("corrupted chain: {0}")]
    Corrupted(String),
}

/// `{before, after, reason?, ...context}` — the one payload shape used
/// everywhere in this crate; a denial without `reason` fails validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl AuditPayload {
    #[must_use]
    pub fn denial(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn transition(before: serde_json::Value, after: serde_json::Value) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.to_string(), value);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTicketEvent {
    pub ticket_id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub payload: AuditPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketEvent {
    pub id: Uuid,
    pub ticket_id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub payload: AuditPayload,
    pub created_at: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub payload: AuditPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub payload: AuditPayload,
    pub created_at: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditEventFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
pub const INVALID_STATE_TRANSITION: &str = "INVALID_STATE_TRANSITION";

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_ticket_event(&self, event: NewTicketEvent) -> AuditResult<TicketEvent>;

    async fn record_audit_event(&self, event: NewAuditEvent) -> AuditResult<AuditEvent>;

    async fn ticket_events(&self, ticket_id: i64) -> AuditResult<Vec<TicketEvent>>;

    async fn audit_events(&self, filter: AuditEventFilter) -> AuditResult<Vec<AuditEvent>>;
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    ticket_events: RwLock<Vec<TicketEvent>>,
    audit_events: RwLock<Vec<AuditEvent>>,
}

const GENESIS: &str = "genesis";

impl InMemoryAuditLog {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn validate_action(action: &str) -> AuditResult<()> {
        if action.trim().is_empty() {
            return Err(AuditError::Validation("action must be provided".into()));
        }
        Ok(())
    }

    fn validate_denial(action: &str, payload: &AuditPayload) -> AuditResult<()> {
        if (action == PERMISSION_DENIED || action == INVALID_STATE_TRANSITION)
            && payload.reason.is_none()
        {
            return Err(AuditError::Validation(format!(
                "{action} must carry a reason"
            )));
        }
        Ok(())
    }

    fn hash_ticket_event(previous: &str, event: &NewTicketEvent, created_at: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        hasher.update(event.ticket_id.to_be_bytes());
        hasher.update(event.action.as_bytes());
        hasher.update(timestamp_bytes(created_at));
        hasher.update(payload_bytes(&event.payload));
        format!("{:x}", hasher.finalize())
    }

    fn hash_audit_event(previous: &str, event: &NewAuditEvent, created_at: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        hasher.update(event.entity_type.as_bytes());
        hasher.update(event.entity_id.as_deref().unwrap_or_default().as_bytes());
        hasher.update(event.action.as_bytes());
        hasher.update(timestamp_bytes(created_at));
        hasher.update(payload_bytes(&event.payload));
        format!("{:x}", hasher.finalize())
    }

    fn verify_ticket_chain(records: &[TicketEvent]) -> AuditResult<()> {
        let mut previous = GENESIS.to_string();
        for record in records {
            if record.previous_hash != previous {
                return Err(AuditError::Corrupted(format!(
                    "unexpected previous hash for ticket event {}",
                    record.id
                )));
            }
            let new_event = NewTicketEvent {
                ticket_id: record.ticket_id,
                actor_id: record.actor_id,
                action: record.action.clone(),
                payload: record.payload.clone(),
            };
            let expected = Self::hash_ticket_event(&record.previous_hash, &new_event, record.created_at);
            if expected != record.hash {
                return Err(AuditError::Corrupted(format!(
                    "hash mismatch for ticket event {}",
                    record.id
                )));
            }
            previous = record.hash.clone();
        }
        Ok(())
    }

    fn verify_audit_chain(records: &[AuditEvent]) -> AuditResult<()> {
        let mut previous = GENESIS.to_string();
        for record in records {
            if record.previous_hash != previous {
                return Err(AuditError::Corrupted(format!(
                    "unexpected previous hash for audit event {}",
                    record.id
                )));
            }
            let new_event = NewAuditEvent {
                actor_id: record.actor_id,
                action: record.action.clone(),
                entity_type: record.entity_type.clone(),
                entity_id: record.entity_id.clone(),
                payload: record.payload.clone(),
            };
            let expected = Self::hash_audit_event(&record.previous_hash, &new_event, record.created_at);
            if expected != record.hash {
                return Err(AuditError::Corrupted(format!(
                    "hash mismatch for audit event {}",
                    record.id
                )));
            }
            previous = record.hash.clone();
        }
        Ok(())
    }
}

fn timestamp_bytes(at: DateTime<Utc>) -> [u8; 8] {
    at.timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_micros() * 1_000)
        .to_be_bytes()
}

fn payload_bytes(payload: &AuditPayload) -> Vec<u8> {
    serde_json::to_vec(payload).unwrap_or_default()
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record_ticket_event(&self, event: NewTicketEvent) -> AuditResult<TicketEvent> {
        Self::validate_action(&event.action)?;
        Self::validate_denial(&event.action, &event.payload)?;

        let mut guard = self.ticket_events.write().await;
        let previous_hash = guard
            .last()
            .map(|record| record.hash.clone())
            .unwrap_or_else(|| GENESIS.to_string());
        let created_at = Utc::now();
        let hash = Self::hash_ticket_event(&previous_hash, &event, created_at);

        let record = TicketEvent {
            id: Uuid::new_v4(),
            ticket_id: event.ticket_id,
            actor_id: event.actor_id,
            action: event.action,
            payload: event.payload,
            created_at,
            previous_hash,
            hash,
        };
        guard.push(record.clone());
        Ok(record)
    }

    async fn record_audit_event(&self, event: NewAuditEvent) -> AuditResult<AuditEvent> {
        Self::validate_action(&event.action)?;
        Self::validate_denial(&event.action, &event.payload)?;

        let mut guard = self.audit_events.write().await;
        let previous_hash = guard
            .last()
            .map(|record| record.hash.clone())
            .unwrap_or_else(|| GENESIS.to_string());
        let created_at = Utc::now();
        let hash = Self::hash_audit_event(&previous_hash, &event, created_at);

        let record = AuditEvent {
            id: Uuid::new_v4(),
            actor_id: event.actor_id,
            action: event.action,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            payload: event.payload,
            created_at,
            previous_hash,
            hash,
        };
        guard.push(record.clone());
        Ok(record)
    }

    async fn ticket_events(&self, ticket_id: i64) -> AuditResult<Vec<TicketEvent>> {
        let guard = self.ticket_events.read().await;
        Self::verify_ticket_chain(&guard)?;
        Ok(guard
            .iter()
            .filter(|record| record.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn audit_events(&self, filter: AuditEventFilter) -> AuditResult<Vec<AuditEvent>> {
        let guard = self.audit_events.read().await;
        Self::verify_audit_chain(&guard)?;
        let mut filtered: Vec<_> = guard
            .iter()
            .filter(|record| {
                filter
                    .entity_type
                    .as_deref()
                    .is_none_or(|wanted| wanted == record.entity_type)
                    && filter
                        .entity_id
                        .as_deref()
                        .is_none_or(|wanted| Some(wanted) == record.entity_id.as_deref())
            })
            .cloned()
            .collect();

        if let Some(limit) = filter.limit
            && filtered.len() > limit
        {
            filtered.truncate(limit);
        }

        Ok(filtered)
    }
}
