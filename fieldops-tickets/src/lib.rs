#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use fieldops_access::Percent;
use fieldops_access::Role;
use fieldops_access::User;
use fieldops_access::UserId;
use thiserror::Error;
use uuid::Uuid;

mod memory;
pub mod payout;

pub use memory::InMemoryTicketService;

pub type TicketId = i64;

pub type TicketResult<T> = Result<T, TicketError>;

/// One variant per entry of the six-member error taxonomy: a denied
/// permission check, a failed precondition, an out-of-domain input, a
/// capacity limit, a uniqueness violation, and an infrastructure failure.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("denied: {0}")]
    Denied(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("exhausted: {0}")]
    Exhausted(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("infra error: {0}")]
    Infra(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    ReadyForWork,
    /// Covers both `IN_WORK` and the legacy `TAKEN` synonym some
    /// preconditions still admit; there is no behavioral difference.
    InWork,
    InProgress,
    Waiting,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    NotSent,
    Sent,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketCategory {
    Plumbing,
    Electrical,
    ApplianceRepair,
    Hvac,
    Locksmith,
    Other,
}

impl TicketCategory {
    fn machine_code(self) -> &'static str {
        match self {
            TicketCategory::Plumbing => "plumbing",
            TicketCategory::Electrical => "electrical",
            TicketCategory::ApplianceRepair => "appliance_repair",
            TicketCategory::Hvac => "hvac",
            TicketCategory::Locksmith => "locksmith",
            TicketCategory::Other => "other",
        }
    }

    fn human_labels(self) -> &'static [&'static str] {
        match self {
            TicketCategory::Plumbing => &["plumbing", "сантехника"],
            TicketCategory::Electrical => &["electrical", "электрика"],
            TicketCategory::ApplianceRepair => &["appliance repair", "ремонт техники", "техника"],
            TicketCategory::Hvac => &["hvac", "кондиционер", "отопление"],
            TicketCategory::Locksmith => &["locksmith", "замки"],
            TicketCategory::Other => &["other", "прочее"],
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            TicketCategory::Plumbing => &["plumber", "leak", "сантех"],
            TicketCategory::Electrical => &["electric", "wiring", "электрик"],
            TicketCategory::ApplianceRepair => &["appliance", "washer", "fridge", "бытовая техника"],
            TicketCategory::Hvac => &["ac", "climate", "кондей"],
            TicketCategory::Locksmith => &["keys", "lock", "замок"],
            TicketCategory::Other => &["misc", "разное"],
        }
    }

    const ALL: [TicketCategory; 6] = [
        TicketCategory::Plumbing,
        TicketCategory::Electrical,
        TicketCategory::ApplianceRepair,
        TicketCategory::Hvac,
        TicketCategory::Locksmith,
        TicketCategory::Other,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdSource {
    Avito,
    Flyer,
    BusinessCard,
    Other,
    Unknown,
}

impl AdSource {
    fn machine_code(self) -> &'static str {
        match self {
            AdSource::Avito => "avito",
            AdSource::Flyer => "flyer",
            AdSource::BusinessCard => "business_card",
            AdSource::Other => "other",
            AdSource::Unknown => "unknown",
        }
    }

    fn human_labels(self) -> &'static [&'static str] {
        match self {
            AdSource::Avito => &["avito"],
            AdSource::Flyer => &["flyer", "листовка"],
            AdSource::BusinessCard => &["business card", "визитка"],
            AdSource::Other => &["other", "прочее"],
            AdSource::Unknown => &["unknown", "неизвестно"],
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            AdSource::Avito => &["avito.ru", "авито"],
            AdSource::Flyer => &["leaflet", "флаер"],
            AdSource::BusinessCard => &["card", "визитная карточка"],
            AdSource::Other => &["misc"],
            AdSource::Unknown => &["n/a", "none"],
        }
    }

    const ALL: [AdSource; 5] = [
        AdSource::Avito,
        AdSource::Flyer,
        AdSource::BusinessCard,
        AdSource::Other,
        AdSource::Unknown,
    ];
}

fn normalize_token(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn category_alias_table() -> &'static HashMap<String, TicketCategory> {
    static TABLE: OnceLock<HashMap<String, TicketCategory>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for category in TicketCategory::ALL {
            map.insert(category.machine_code().to_string(), category);
            for label in category.human_labels() {
                map.insert(normalize_token(label), category);
            }
            for alias in category.aliases() {
                map.insert(normalize_token(alias), category);
            }
        }
        map
    })
}

fn ad_source_alias_table() -> &'static HashMap<String, AdSource> {
    static TABLE: OnceLock<HashMap<String, AdSource>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for source in AdSource::ALL {
            map.insert(source.machine_code().to_string(), source);
            for label in source.human_labels() {
                map.insert(normalize_token(label), source);
            }
            for alias in source.aliases() {
                map.insert(normalize_token(alias), source);
            }
        }
        map
    })
}

/// The only place in the core that accepts free-text category input.
#[must_use]
pub fn normalize_ticket_category(value: &str) -> Option<TicketCategory> {
    let key = normalize_token(value);
    let found = category_alias_table().get(&key).copied();
    if found.is_none() {
        tracing::warn!(input = %value, "unrecognized ticket category");
    }
    found
}

/// The only place in the core that accepts free-text ad-source input.
#[must_use]
pub fn normalize_ad_source(value: &str) -> Option<AdSource> {
    let key = normalize_token(value);
    let found = ad_source_alias_table().get(&key).copied();
    if found.is_none() {
        tracing::warn!(input = %value, "unrecognized ad source");
    }
    found
}

/// Normalizes a phone number to digits-only (optionally keeping a leading
/// `+` as an implicit marker, which is then stripped) and validates length.
pub fn normalize_phone(raw: &str) -> TicketResult<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if !(7..=15).contains(&digits.len()) {
        return Err(TicketError::Validation(format!(
            "phone number must have 7-15 digits, got {}",
            digits.len()
        )));
    }
    Ok(digits)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub id: TicketId,
    pub public_id: String,
    pub status: TicketStatus,
    pub category: TicketCategory,
    pub client_phone: String,
    pub client_address: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub preferred_date_dm: Option<String>,
    pub problem_text: Option<String>,
    pub special_note: Option<String>,
    pub ad_source: Option<AdSource>,
    pub is_repeat: bool,
    pub repeat_ticket_ids: Vec<TicketId>,
    pub lead_id: Option<Uuid>,
    pub created_by_user_id: UserId,
    pub assigned_executor_id: Option<UserId>,
    pub junior_master_id: Option<UserId>,
    pub taken_at: Option<DateTime<Utc>>,
    pub revenue_minor: Option<i64>,
    pub expense_minor: Option<i64>,
    pub net_profit_minor: Option<i64>,
    pub executor_percent_at_close: Option<Percent>,
    pub admin_percent_at_close: Option<Percent>,
    pub junior_percent_at_close: Option<Percent>,
    pub executor_earned_minor: Option<i64>,
    pub admin_earned_minor: Option<i64>,
    pub junior_earned_minor: Option<i64>,
    pub project_take_minor: Option<i64>,
    pub transfer_status: TransferStatus,
    pub transfer_sent_at: Option<DateTime<Utc>>,
    pub transfer_confirmed_at: Option<DateTime<Utc>>,
    pub transfer_confirmed_by: Option<UserId>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by_user_id: Option<UserId>,
    pub closed_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    #[must_use]
    pub fn is_executor(&self, user_id: UserId) -> bool {
        self.assigned_executor_id == Some(user_id)
    }
}

#[must_use]
pub fn is_super_override(role: Role) -> bool {
    matches!(role, Role::SuperAdmin | Role::SysAdmin)
}

#[derive(Debug, Clone)]
pub struct NewTicketRequest {
    pub category: String,
    pub client_phone: String,
    pub client_address: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub preferred_date_dm: Option<String>,
    pub problem_text: Option<String>,
    pub special_note: Option<String>,
    pub ad_source: Option<String>,
    pub is_repeat: bool,
    pub repeat_ticket_ids: Vec<TicketId>,
    pub lead_id: Option<Uuid>,
}

pub(crate) struct NormalizedTicketRequest {
    pub category: TicketCategory,
    pub client_phone: String,
    pub client_address: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub preferred_date_dm: Option<String>,
    pub problem_text: Option<String>,
    pub special_note: Option<String>,
    pub ad_source: Option<AdSource>,
    pub is_repeat: bool,
    pub repeat_ticket_ids: Vec<TicketId>,
    pub lead_id: Option<Uuid>,
}

impl NewTicketRequest {
    pub(crate) fn normalize(self) -> TicketResult<NormalizedTicketRequest> {
        let category = normalize_ticket_category(&self.category)
            .ok_or_else(|| TicketError::Validation(format!("unknown category: {}", self.category)))?;
        let client_phone = normalize_phone(&self.client_phone)?;
        let ad_source = match self.ad_source {
            Some(raw) => Some(
                normalize_ad_source(&raw)
                    .ok_or_else(|| TicketError::Validation(format!("unknown ad source: {raw}")))?,
            ),
            None => None,
        };
        Ok(NormalizedTicketRequest {
            category,
            client_phone,
            client_address: self.client_address,
            scheduled_at: self.scheduled_at,
            preferred_date_dm: self.preferred_date_dm,
            problem_text: self.problem_text,
            special_note: self.special_note,
            ad_source,
            is_repeat: self.is_repeat,
            repeat_ticket_ids: self.repeat_ticket_ids,
            lead_id: self.lead_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub revenue_minor: i64,
    pub expense_minor: i64,
    pub junior_master_id: Option<UserId>,
    pub junior_percent: Option<Percent>,
    pub closed_comment: Option<String>,
    pub photos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketClosePhoto {
    pub id: Uuid,
    pub ticket_id: TicketId,
    pub file_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoneyOpType {
    Income,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketMoneyOperation {
    pub id: Uuid,
    pub ticket_id: TicketId,
    pub op_type: MoneyOpType,
    pub amount_minor: i64,
    pub category_snapshot: TicketCategory,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectTxType {
    Income,
    Expense,
}

#[derive(Debug, Clone)]
pub struct NewProjectTransaction {
    pub tx_type: ProjectTxType,
    pub amount_minor: i64,
    pub category: String,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTransaction {
    pub id: Uuid,
    pub tx_type: ProjectTxType,
    pub amount_minor: i64,
    pub category: String,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| ts >= start) && self.end.is_none_or(|end| ts <= end)
    }
}

/// Lets a paired aggregate (the lead pipeline) be flipped atomically alongside
/// a ticket create, without `fieldops-tickets` depending on that crate.
/// `create_for_lead` invokes this from inside the same state-lock critical
/// section that inserts the new ticket; if it fails, the insert is rolled
/// back, so a ticket can never exist without its paired lead having converted.
#[async_trait]
pub trait LeadConversionHook: Send + Sync {
    async fn mark_converted(&self, ticket_id: TicketId) -> Result<(), String>;
}

#[async_trait]
pub trait TicketService: Send + Sync {
    async fn create(&self, request: NewTicketRequest, actor: &User) -> TicketResult<Ticket>;

    /// Same as `create`, but runs `lead_hook.mark_converted` inside the same
    /// critical section as the ticket insert and rolls the insert back if it
    /// fails, so the two never commit independently.
    async fn create_for_lead(
        &self,
        request: NewTicketRequest,
        actor: &User,
        lead_hook: &(dyn LeadConversionHook + '_),
    ) -> TicketResult<Ticket>;

    async fn take(&self, ticket_id: TicketId, actor: &User) -> TicketResult<Ticket>;

    async fn set_in_progress(&self, ticket_id: TicketId, actor: &User) -> TicketResult<Ticket>;

    async fn close(
        &self,
        ticket_id: TicketId,
        actor: &User,
        request: CloseRequest,
    ) -> TicketResult<Ticket>;

    async fn mark_transfer_sent(&self, ticket_id: TicketId, actor: &User) -> TicketResult<Ticket>;

    async fn confirm_transfer(
        &self,
        ticket_id: TicketId,
        actor: &User,
        approved: bool,
    ) -> TicketResult<Ticket>;

    async fn cancel(&self, ticket_id: TicketId, actor: &User) -> TicketResult<Ticket>;

    async fn get(&self, ticket_id: TicketId) -> TicketResult<Ticket>;

    async fn list(&self) -> TicketResult<Vec<Ticket>>;

    async fn list_closed(&self, range: DateRange) -> TicketResult<Vec<Ticket>>;

    async fn money_operations(&self, ticket_id: TicketId) -> TicketResult<Vec<TicketMoneyOperation>>;

    async fn close_photos(&self, ticket_id: TicketId) -> TicketResult<Vec<TicketClosePhoto>>;

    async fn add_project_transaction(
        &self,
        request: NewProjectTransaction,
        actor: &User,
    ) -> TicketResult<ProjectTransaction>;

    async fn list_project_transactions(&self, range: DateRange) -> TicketResult<Vec<ProjectTransaction>>;
}

/// C3: atomic per-calendar-day sequence, ceiling 99.
#[async_trait]
pub trait DailySequencer: Send + Sync {
    async fn next_sequence(&self, date: NaiveDate) -> TicketResult<u8>;
}

#[must_use]
pub fn format_public_id(date: NaiveDate, sequence: u8) -> String {
    format!("{}{sequence:02}", date.format("%d%m%y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_normalizes_machine_code_and_alias() {
        assert_eq!(
            normalize_ticket_category("plumbing"),
            Some(TicketCategory::Plumbing)
        );
        assert_eq!(
            normalize_ticket_category("  Сантех "),
            Some(TicketCategory::Plumbing)
        );
        assert_eq!(normalize_ticket_category("nonsense-xyz"), None);
    }

    #[test]
    fn ad_source_normalizes_transliterated_alias() {
        assert_eq!(normalize_ad_source("авито"), Some(AdSource::Avito));
        assert_eq!(normalize_ad_source("leaflet"), Some(AdSource::Flyer));
    }

    #[test]
    fn phone_normalization_rejects_short_numbers() {
        assert!(normalize_phone("123").is_err());
        assert_eq!(normalize_phone("+7 (900) 123-45-67").unwrap(), "79001234567");
    }

    #[test]
    fn public_id_matches_day_month_year_and_sequence() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 27).expect("valid date");
        assert_eq!(format_public_id(date, 3), "27072603");
    }
}
