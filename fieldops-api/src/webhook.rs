use chrono::DateTime;
use chrono::Utc;
use fieldops_leads::LeadId;
use fieldops_leads::NewLeadPayload;
use fieldops_tickets::normalize_phone;
use thiserror::Error;

const MAX_MESSAGE_LEN: usize = 3500;

/// `POST /webhook/lead` body, already JSON-deserialized by the (out-of-scope)
/// listener. `handle_lead_webhook` is pure: it never touches the network and
/// never calls a lead registry — it just validates the secret and shape, and
/// hands back a payload ready for `LeadRegistry::ingest`.
#[derive(Debug, Clone)]
pub struct LeadWebhookBody {
    pub external_id: LeadId,
    pub ts: DateTime<Utc>,
    pub phone: String,
    pub message: String,
    pub name: Option<String>,
    pub source: Option<String>,
    pub category_id: Option<String>,
    pub category_title: Option<String>,
    pub issue_title: Option<String>,
    pub ip: Option<String>,
    pub ua: Option<String>,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing or invalid x-webhook-secret header")]
    Unauthorized,
    #[error("webhook secret is not configured")]
    SecretNotConfigured,
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedLeadIngest {
    pub external_id: LeadId,
    pub payload: NewLeadPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookOutcome {
    pub ok: bool,
    pub duplicate: bool,
}

/// Validates the secret header and body shape, truncates the message, and
/// normalizes the phone — everything a listener needs before calling
/// `LeadRegistry::ingest`. Returns the 401/503/400 cases as distinct errors
/// so a thin HTTP layer can map them onto the documented status codes.
pub fn handle_lead_webhook(
    configured_secret: Option<&str>,
    secret_header: Option<&str>,
    body: LeadWebhookBody,
) -> Result<ValidatedLeadIngest, WebhookError> {
    let configured_secret = configured_secret.ok_or(WebhookError::SecretNotConfigured)?;
    match secret_header {
        Some(header) if header == configured_secret => {}
        _ => return Err(WebhookError::Unauthorized),
    }

    let phone = normalize_phone(&body.phone).map_err(|err| WebhookError::InvalidPhone(err.to_string()))?;
    let mut message = body.message;
    if message.len() > MAX_MESSAGE_LEN {
        message.truncate(MAX_MESSAGE_LEN);
    }

    Ok(ValidatedLeadIngest {
        external_id: body.external_id,
        payload: NewLeadPayload {
            phone,
            message,
            name: body.name,
            source: body.source,
            category_hint: body.category_title.or(body.category_id),
            issue_title: body.issue_title,
            scheduled_at: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn body() -> LeadWebhookBody {
        LeadWebhookBody {
            external_id: Uuid::new_v4(),
            ts: Utc::now(),
            phone: "+7 999 123 45 67".into(),
            message: "Need a plumber".into(),
            name: None,
            source: Some("avito".into()),
            category_id: None,
            category_title: Some("plumbing".into()),
            issue_title: None,
            ip: None,
            ua: None,
        }
    }

    #[test]
    fn rejects_when_secret_not_configured() {
        let result = handle_lead_webhook(None, Some("anything"), body());
        assert!(matches!(result, Err(WebhookError::SecretNotConfigured)));
    }

    #[test]
    fn rejects_mismatched_secret() {
        let result = handle_lead_webhook(Some("s3cr3t"), Some("wrong"), body());
        assert!(matches!(result, Err(WebhookError::Unauthorized)));
    }

    #[test]
    fn rejects_invalid_phone() {
        let mut payload = body();
        payload.phone = "abc".into();
        let result = handle_lead_webhook(Some("s3cr3t"), Some("s3cr3t"), payload);
        assert!(matches!(result, Err(WebhookError::InvalidPhone(_))));
    }

    #[test]
    fn accepts_matching_secret_and_normalizes_phone() {
        let result = handle_lead_webhook(Some("s3cr3t"), Some("s3cr3t"), body()).unwrap();
        assert_eq!(result.payload.phone, "79991234567");
        assert_eq!(result.payload.category_hint, Some("plumbing".into()));
    }

    #[test]
    fn truncates_overlong_message() {
        let mut payload = body();
        payload.message = "x".repeat(MAX_MESSAGE_LEN + 500);
        let result = handle_lead_webhook(Some("s3cr3t"), Some("s3cr3t"), payload).unwrap();
        assert_eq!(result.payload.message.len(), MAX_MESSAGE_LEN);
    }
}
