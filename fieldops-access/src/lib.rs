#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Display;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

mod in_memory;

pub use crate::in_memory::InMemoryAccessGate;

pub type UserId = i64;

pub type AccessResult<T> = Result<T, AccessError>;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("user not found: {0}")]
    NotFound(UserId),
}

/// Role rank, lowest to highest. Only `ensure_actor` promotions are rank-checked;
/// explicit role assignment by an admin bypasses rank entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    User,
    JuniorAdmin,
    JuniorMaster,
    Master,
    Admin,
    SysAdmin,
    SuperAdmin,
}

impl Role {
    #[must_use]
    pub fn rank(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn is_admin_like(self) -> bool {
        matches!(
            self,
            Role::Admin | Role::JuniorAdmin | Role::SysAdmin | Role::SuperAdmin
        )
    }

    #[must_use]
    pub fn is_executor_like(self) -> bool {
        matches!(self, Role::Master | Role::JuniorMaster)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Role::User => "USER",
            Role::JuniorAdmin => "JUNIOR_ADMIN",
            Role::JuniorMaster => "JUNIOR_MASTER",
            Role::Master => "MASTER",
            Role::Admin => "ADMIN",
            Role::SysAdmin => "SYS_ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
        };
        write!(f, "{label}")
    }
}

/// A percentage with at most two decimal places, stored as hundredths of a
/// percent (0..=10000) so comparisons and rounding never touch floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percent(i32);

impl Percent {
    pub const ZERO: Percent = Percent(0);

    pub fn from_hundredths(hundredths: i32) -> AccessResult<Self> {
        if !(0..=10_000).contains(&hundredths) {
            return Err(AccessError::Validation(format!(
                "percent out of range: {hundredths} hundredths"
            )));
        }
        Ok(Self(hundredths))
    }

    /// `value` is the percent itself (e.g. `45.25`), validated to at most 2
    /// decimal places by rejecting any fractional hundredths.
    pub fn from_decimal(value: f64) -> AccessResult<Self> {
        if !value.is_finite() {
            return Err(AccessError::Validation("percent is not finite".into()));
        }
        let scaled = value * 100.0;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 {
            return Err(AccessError::Validation(
                "percent must have at most 2 decimal places".into(),
            ));
        }
        Self::from_hundredths(rounded as i32)
    }

    #[must_use]
    pub fn as_hundredths(self) -> i32 {
        self.0
    }

    /// Applies this percent to a money amount expressed in minor units,
    /// rounding half up.
    #[must_use]
    pub fn apply_half_up(self, amount_minor: i64) -> i64 {
        let numerator = amount_minor as i128 * self.0 as i128;
        let denominator = 10_000_i128;
        let doubled = numerator * 2 + denominator;
        ((doubled / (denominator * 2)) as i64).max(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub role: Role,
    pub is_active: bool,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub master_percent: Option<Percent>,
    pub admin_percent: Option<Percent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub(crate) fn new(id: UserId, display_name: Option<String>, username: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            role: Role::User,
            is_active: true,
            display_name,
            username,
            master_percent: None,
            admin_percent: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Environment-declared privileged IDs consulted by `ensure_actor` promotions.
#[derive(Debug, Clone, Default)]
pub struct PrivilegedIds {
    pub super_admin: Option<UserId>,
    pub sys_admins: Vec<UserId>,
}

impl PrivilegedIds {
    #[must_use]
    pub fn classify(&self, external_id: UserId) -> Option<Role> {
        if self.super_admin == Some(external_id) {
            return Some(Role::SuperAdmin);
        }
        if self.sys_admins.contains(&external_id) {
            return Some(Role::SysAdmin);
        }
        None
    }
}

/// The fixed set of state-changing operations the permission gate recognizes.
/// Each maps to a fixed allowed-role set; there is no per-tenant or runtime
/// configurable rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateTicket,
    TakeTicket,
    SetInProgress,
    CloseTicket,
    MarkTransferSent,
    CancelTicket,
    ConfirmTransfer,
    LinkJunior,
    SetLinkPercentSoleJunior,
    SetLinkPercentSharedJunior,
    DisableLink,
    AddProjectTransaction,
}

impl Operation {
    #[must_use]
    pub fn allowed_roles(self) -> &'static [Role] {
        use Role::{Admin, JuniorAdmin, JuniorMaster, Master, SuperAdmin, SysAdmin};
        match self {
            Operation::CreateTicket => &[Admin, JuniorAdmin, SuperAdmin, SysAdmin],
            Operation::TakeTicket => &[Master, JuniorMaster, SuperAdmin, SysAdmin],
            Operation::SetInProgress => &[Master, JuniorMaster, SuperAdmin, SysAdmin],
            Operation::CloseTicket => &[Master, JuniorMaster, SuperAdmin, SysAdmin],
            // No role predicate: eligibility is "actor is the ticket's executor",
            // checked by identity, not role membership.
            Operation::MarkTransferSent => &[],
            Operation::CancelTicket => &[SuperAdmin, SysAdmin, Admin, JuniorAdmin],
            Operation::ConfirmTransfer => &[SuperAdmin, SysAdmin],
            Operation::LinkJunior => &[Admin, SuperAdmin, SysAdmin],
            Operation::SetLinkPercentSoleJunior => &[Admin, SuperAdmin, SysAdmin],
            Operation::SetLinkPercentSharedJunior => &[Master, SuperAdmin, SysAdmin],
            Operation::DisableLink => &[Admin, SuperAdmin, SysAdmin],
            Operation::AddProjectTransaction => &[Admin, SuperAdmin, SysAdmin],
        }
    }

    #[must_use]
    pub fn reason_code(self) -> &'static str {
        match self {
            Operation::CreateTicket => "TICKET_CREATE",
            Operation::TakeTicket => "TICKET_TAKE",
            Operation::SetInProgress => "TICKET_SET_IN_PROGRESS",
            Operation::CloseTicket => "TICKET_CLOSE",
            Operation::MarkTransferSent => "TRANSFER_SENT",
            Operation::CancelTicket => "TICKET_CANCEL",
            Operation::ConfirmTransfer => "TRANSFER_CONFIRM",
            Operation::LinkJunior => "JUNIOR_LINK",
            Operation::SetLinkPercentSoleJunior | Operation::SetLinkPercentSharedJunior => {
                "JUNIOR_LINK_PERCENT"
            }
            Operation::DisableLink => "JUNIOR_LINK_DISABLE",
            Operation::AddProjectTransaction => "PROJECT_TX_ADD",
        }
    }
}

/// Stateless predicate table: operation -> allowed roles. `SetInProgress` and
/// `CloseTicket` narrow the same role set further by executor identity
/// (checked by the ticket engine, not here). `mark_transfer_sent` has no
/// entry at all — its only requirement is "actor is the ticket's executor",
/// a check the ticket engine performs directly against `assigned_executor_id`.
pub struct PermissionTable;

impl PermissionTable {
    #[must_use]
    pub fn is_allowed(role: Role, operation: Operation) -> bool {
        operation.allowed_roles().contains(&role)
    }

    pub fn check(role: Role, operation: Operation) -> AccessResult<()> {
        if Self::is_allowed(role, operation) {
            Ok(())
        } else {
            Err(AccessError::Validation(format!(
                "role {role} is not permitted to perform {}",
                operation.reason_code()
            )))
        }
    }
}

/// Row-level visibility a query must apply, as determined by C10 from the
/// acting user's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketVisibility {
    Unrestricted,
    OnlyAssignedTo(UserId),
}

#[must_use]
pub fn visibility_for(user: &User) -> TicketVisibility {
    if user.role.is_executor_like() {
        TicketVisibility::OnlyAssignedTo(user.id)
    } else {
        TicketVisibility::Unrestricted
    }
}

/// How a raw search string should be interpreted by ticket lookup, per C10.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKind {
    InternalId(i64),
    PublicId(String),
    PhoneSubstring(String),
}

#[must_use]
pub fn classify_search(raw: &str) -> SearchKind {
    let trimmed = raw.trim();
    let digits_only = trimmed.chars().all(|c| c.is_ascii_digit()) && !trimmed.is_empty();
    if digits_only && trimmed.len() == 8 {
        return SearchKind::PublicId(trimmed.to_string());
    }
    if digits_only {
        if let Ok(id) = trimmed.parse::<i64>() {
            return SearchKind::InternalId(id);
        }
    }
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    SearchKind::PhoneSubstring(digits)
}

#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Upserts the caller's identity. Refreshes `display_name`/`username` on
    /// every call; promotes role only via `PrivilegedIds`, never demotes.
    async fn ensure_actor(
        &self,
        external_id: UserId,
        display_name: Option<String>,
        username: Option<String>,
    ) -> AccessResult<User>;

    async fn get_user(&self, id: UserId) -> AccessResult<User>;

    async fn list_users(&self) -> AccessResult<Vec<User>>;

    /// Explicit admin-driven role assignment. Not rank-checked: an admin may
    /// assign any role, including one below the user's current rank.
    async fn set_role(&self, id: UserId, role: Role) -> AccessResult<User>;

    async fn set_active(&self, id: UserId, is_active: bool) -> AccessResult<User>;

    async fn set_master_percent(&self, id: UserId, percent: Option<Percent>)
    -> AccessResult<User>;

    async fn set_admin_percent(&self, id: UserId, percent: Option<Percent>) -> AccessResult<User>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_rank_orders_privileged_above_master() {
        assert!(Role::SuperAdmin.rank() > Role::SysAdmin.rank());
        assert!(Role::SysAdmin.rank() > Role::Admin.rank());
        assert!(Role::Master.rank() > Role::JuniorMaster.rank());
        assert!(Role::JuniorMaster.rank() > Role::User.rank());
    }

    #[test]
    fn percent_rejects_out_of_range() {
        assert!(Percent::from_hundredths(10_001).is_err());
        assert!(Percent::from_hundredths(-1).is_err());
        assert!(Percent::from_hundredths(10_000).is_ok());
    }

    #[test]
    fn percent_rejects_more_than_two_decimals() {
        assert!(Percent::from_decimal(45.255).is_err());
        assert!(Percent::from_decimal(45.25).is_ok());
    }

    #[test]
    fn percent_applies_half_up() {
        let half = Percent::from_decimal(50.0).expect("valid percent");
        assert_eq!(half.apply_half_up(101), 51);
        let third = Percent::from_decimal(33.33).expect("valid percent");
        assert_eq!(third.apply_half_up(100), 33);
    }

    #[test]
    fn permission_table_matches_fixed_role_sets() {
        assert!(PermissionTable::is_allowed(Role::Admin, Operation::CreateTicket));
        assert!(!PermissionTable::is_allowed(
            Role::Master,
            Operation::CreateTicket
        ));
        assert!(PermissionTable::is_allowed(
            Role::Master,
            Operation::TakeTicket
        ));
        assert!(PermissionTable::check(Role::User, Operation::CancelTicket).is_err());
    }

    #[test]
    fn privileged_ids_classify_super_before_sys() {
        let privileged = PrivilegedIds {
            super_admin: Some(1),
            sys_admins: vec![1, 2],
        };
        assert_eq!(privileged.classify(1), Some(Role::SuperAdmin));
        assert_eq!(privileged.classify(2), Some(Role::SysAdmin));
        assert_eq!(privileged.classify(3), None);
    }

    #[test]
    fn search_classification_splits_by_shape() {
        assert_eq!(classify_search("27072601"), SearchKind::PublicId("27072601".into()));
        assert_eq!(classify_search("4821"), SearchKind::InternalId(4821));
        assert_eq!(
            classify_search("+7 (900) 123-45-67"),
            SearchKind::PhoneSubstring("79001234567".into())
        );
    }

    #[test]
    fn visibility_restricts_executor_roles_only() {
        let mut user = User::new(7, None, None);
        user.role = Role::Master;
        assert_eq!(visibility_for(&user), TicketVisibility::OnlyAssignedTo(7));
        user.role = Role::Admin;
        assert_eq!(visibility_for(&user), TicketVisibility::Unrestricted);
    }
}
