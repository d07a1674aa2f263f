#![deny(clippy::print_stdout, clippy::print_stderr)]

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use fieldops_access::Percent;
use fieldops_access::UserId;
use thiserror::Error;
use uuid::Uuid;

mod memory;

pub use memory::InMemoryLinkRegistry;

pub type LinkId = Uuid;
pub type LinkResult<T> = Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("denied: {0}")]
    Denied(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("infra error: {0}")]
    Infra(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterJuniorLink {
    pub id: LinkId,
    pub master_id: UserId,
    pub junior_id: UserId,
    pub percent: Percent,
    pub is_active: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectShare {
    pub id: LinkId,
    pub user_id: UserId,
    pub percent: Percent,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait JuniorLinkRegistry: Send + Sync {
    async fn link(
        &self,
        master_id: UserId,
        junior_id: UserId,
        percent: Percent,
        actor_id: UserId,
    ) -> LinkResult<MasterJuniorLink>;

    /// If the master has exactly one active junior, only ADMIN/SUPER/SYS can
    /// call this; with more than one, only the master (self) or SUPER/SYS.
    async fn set_percent(
        &self,
        link_id: LinkId,
        percent: Percent,
        actor_id: UserId,
    ) -> LinkResult<MasterJuniorLink>;

    /// Deactivates the junior's current link and creates a new one against
    /// `new_master_id`, in the same unit of work.
    async fn relink(
        &self,
        junior_id: UserId,
        new_master_id: UserId,
        percent: Percent,
        actor_id: UserId,
    ) -> LinkResult<MasterJuniorLink>;

    async fn disable(&self, link_id: LinkId, actor_id: UserId) -> LinkResult<MasterJuniorLink>;

    async fn active_link_for_junior(&self, junior_id: UserId) -> LinkResult<Option<MasterJuniorLink>>;

    async fn active_links_for_master(&self, master_id: UserId) -> LinkResult<Vec<MasterJuniorLink>>;
}

/// Mirrors `JuniorLinkRegistry`'s deactivate-then-insert idiom for a single
/// active share per user. Unlike junior links, `set_share` carries no role
/// gate: the system this was ported from never validated the caller here,
/// and nothing in the data model depends on it being gated.
#[async_trait]
pub trait ProjectShareRegistry: Send + Sync {
    async fn set_share(&self, user_id: UserId, percent: Percent, actor_id: UserId) -> LinkResult<ProjectShare>;

    async fn active_share_for(&self, user_id: UserId) -> LinkResult<Option<ProjectShare>>;
}
