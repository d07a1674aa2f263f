use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fieldops_access::AccessGate;
use fieldops_access::Operation;
use fieldops_access::Percent;
use fieldops_access::PermissionTable;
use fieldops_access::Role;
use fieldops_access::UserId;
use fieldops_audit::AuditLog;
use fieldops_audit::AuditPayload;
use fieldops_audit::NewAuditEvent;
use fieldops_audit::PERMISSION_DENIED;
use tokio::sync::Mutex;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::JuniorLinkRegistry;
use crate::LinkError;
use crate::LinkId;
use crate::LinkResult;
use crate::MasterJuniorLink;
use crate::ProjectShare;
use crate::ProjectShareRegistry;

#[derive(Default)]
struct State {
    links: HashMap<LinkId, MasterJuniorLink>,
    shares: HashMap<UserId, Vec<ProjectShare>>,
}

pub struct InMemoryLinkRegistry {
    access: Arc<dyn AccessGate>,
    audit: Arc<dyn AuditLog>,
    state: Mutex<State>,
}

impl InMemoryLinkRegistry {
    #[must_use]
    pub fn new(access: Arc<dyn AccessGate>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            access,
            audit,
            state: Mutex::new(State::default()),
        }
    }

    async fn deny(&self, actor_id: UserId, entity_id: Option<String>, operation: Operation) -> LinkError {
        warn!(actor_id, ?entity_id, reason = operation.reason_code(), "permission denied");
        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor_id),
                action: PERMISSION_DENIED.to_string(),
                entity_type: "master_junior_link".to_string(),
                entity_id,
                payload: AuditPayload::denial(operation.reason_code()),
            })
            .await;
        LinkError::Denied(operation.reason_code().to_string())
    }
}

#[async_trait]
impl JuniorLinkRegistry for InMemoryLinkRegistry {
    async fn link(
        &self,
        master_id: UserId,
        junior_id: UserId,
        percent: Percent,
        actor_id: UserId,
    ) -> LinkResult<MasterJuniorLink> {
        let actor = self
            .access
            .get_user(actor_id)
            .await
            .map_err(|err| LinkError::Infra(err.to_string()))?;
        if !PermissionTable::is_allowed(actor.role, Operation::LinkJunior) {
            return Err(self.deny(actor_id, None, Operation::LinkJunior).await);
        }

        let master = self
            .access
            .get_user(master_id)
            .await
            .map_err(|err| LinkError::Infra(err.to_string()))?;
        if !matches!(master.role, Role::Master | Role::SuperAdmin) {
            return Err(LinkError::Validation(
                "master candidate must hold the MASTER or SUPER_ADMIN role".into(),
            ));
        }
        let junior = self
            .access
            .get_user(junior_id)
            .await
            .map_err(|err| LinkError::Infra(err.to_string()))?;
        if junior.role != Role::JuniorMaster {
            return Err(LinkError::Validation(
                "junior candidate must hold the JUNIOR_MASTER role".into(),
            ));
        }

        let mut guard = self.state.lock().await;
        let already_linked = guard
            .links
            .values()
            .any(|link| link.junior_id == junior_id && link.is_active);
        if already_linked {
            return Err(LinkError::Conflict(format!(
                "junior {junior_id} already has an active link"
            )));
        }

        let now = Utc::now();
        let link = MasterJuniorLink {
            id: Uuid::new_v4(),
            master_id,
            junior_id,
            percent,
            is_active: true,
            created_by: actor_id,
            created_at: now,
            updated_at: now,
        };
        guard.links.insert(link.id, link.clone());
        drop(guard);

        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor_id),
                action: "JUNIOR_LINK_CREATED".to_string(),
                entity_type: "master_junior_link".to_string(),
                entity_id: Some(link.id.to_string()),
                payload: AuditPayload::transition(
                    serde_json::Value::Null,
                    serde_json::json!({
                        "master_id": master_id,
                        "junior_id": junior_id,
                        "percent": percent.as_hundredths(),
                    }),
                ),
            })
            .await;

        info!(link_id = %link.id, master_id, junior_id, "junior link created");
        Ok(link)
    }

    async fn set_percent(
        &self,
        link_id: LinkId,
        percent: Percent,
        actor_id: UserId,
    ) -> LinkResult<MasterJuniorLink> {
        let actor = self
            .access
            .get_user(actor_id)
            .await
            .map_err(|err| LinkError::Infra(err.to_string()))?;

        let mut guard = self.state.lock().await;
        let master_id = guard
            .links
            .get(&link_id)
            .ok_or_else(|| LinkError::NotFound(format!("link {link_id}")))?
            .master_id;
        let active_count = guard
            .links
            .values()
            .filter(|link| link.master_id == master_id && link.is_active)
            .count();

        let operation = if active_count <= 1 {
            Operation::SetLinkPercentSoleJunior
        } else {
            Operation::SetLinkPercentSharedJunior
        };
        let role_allowed = PermissionTable::is_allowed(actor.role, operation);
        let self_master_allowed =
            active_count > 1 && actor.role == Role::Master && actor_id == master_id;
        if !(role_allowed || self_master_allowed) {
            drop(guard);
            return Err(self
                .deny(actor_id, Some(link_id.to_string()), operation)
                .await);
        }

        let link = guard
            .links
            .get_mut(&link_id)
            .ok_or_else(|| LinkError::NotFound(format!("link {link_id}")))?;
        let before_percent = link.percent;
        link.percent = percent;
        link.updated_at = Utc::now();
        let result = link.clone();
        drop(guard);

        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor_id),
                action: "JUNIOR_LINK_PERCENT_SET".to_string(),
                entity_type: "master_junior_link".to_string(),
                entity_id: Some(link_id.to_string()),
                payload: AuditPayload::transition(
                    serde_json::json!({"percent": before_percent.as_hundredths()}),
                    serde_json::json!({"percent": percent.as_hundredths()}),
                ),
            })
            .await;

        info!(link_id = %link_id, actor_id, "link percent updated");
        Ok(result)
    }

    async fn relink(
        &self,
        junior_id: UserId,
        new_master_id: UserId,
        percent: Percent,
        actor_id: UserId,
    ) -> LinkResult<MasterJuniorLink> {
        let actor = self
            .access
            .get_user(actor_id)
            .await
            .map_err(|err| LinkError::Infra(err.to_string()))?;
        if !PermissionTable::is_allowed(actor.role, Operation::LinkJunior) {
            return Err(self.deny(actor_id, None, Operation::LinkJunior).await);
        }

        let mut guard = self.state.lock().await;
        for link in guard.links.values_mut() {
            if link.junior_id == junior_id && link.is_active {
                link.is_active = false;
                link.updated_at = Utc::now();
            }
        }

        let now = Utc::now();
        let link = MasterJuniorLink {
            id: Uuid::new_v4(),
            master_id: new_master_id,
            junior_id,
            percent,
            is_active: true,
            created_by: actor_id,
            created_at: now,
            updated_at: now,
        };
        guard.links.insert(link.id, link.clone());
        drop(guard);

        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor_id),
                action: "JUNIOR_RELINKED".to_string(),
                entity_type: "master_junior_link".to_string(),
                entity_id: Some(link.id.to_string()),
                payload: AuditPayload::transition(
                    serde_json::Value::Null,
                    serde_json::json!({
                        "junior_id": junior_id,
                        "new_master_id": new_master_id,
                        "percent": percent.as_hundredths(),
                    }),
                ),
            })
            .await;

        info!(link_id = %link.id, junior_id, new_master_id, "junior relinked");
        Ok(link)
    }

    async fn disable(&self, link_id: LinkId, actor_id: UserId) -> LinkResult<MasterJuniorLink> {
        let actor = self
            .access
            .get_user(actor_id)
            .await
            .map_err(|err| LinkError::Infra(err.to_string()))?;
        if !PermissionTable::is_allowed(actor.role, Operation::DisableLink) {
            return Err(self
                .deny(actor_id, Some(link_id.to_string()), Operation::DisableLink)
                .await);
        }

        let mut guard = self.state.lock().await;
        let link = guard
            .links
            .get_mut(&link_id)
            .ok_or_else(|| LinkError::NotFound(format!("link {link_id}")))?;
        link.is_active = false;
        link.updated_at = Utc::now();
        let result = link.clone();
        drop(guard);

        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor_id),
                action: "JUNIOR_LINK_DISABLED".to_string(),
                entity_type: "master_junior_link".to_string(),
                entity_id: Some(link_id.to_string()),
                payload: AuditPayload::transition(
                    serde_json::json!({"is_active": true}),
                    serde_json::json!({"is_active": false}),
                ),
            })
            .await;

        info!(link_id = %link_id, actor_id, "link disabled");
        Ok(result)
    }

    async fn active_link_for_junior(&self, junior_id: UserId) -> LinkResult<Option<MasterJuniorLink>> {
        let guard = self.state.lock().await;
        Ok(guard
            .links
            .values()
            .find(|link| link.junior_id == junior_id && link.is_active)
            .cloned())
    }

    async fn active_links_for_master(&self, master_id: UserId) -> LinkResult<Vec<MasterJuniorLink>> {
        let guard = self.state.lock().await;
        Ok(guard
            .links
            .values()
            .filter(|link| link.master_id == master_id && link.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProjectShareRegistry for InMemoryLinkRegistry {
    async fn set_share(&self, user_id: UserId, percent: Percent, actor_id: UserId) -> LinkResult<ProjectShare> {
        let mut guard = self.state.lock().await;
        let entries = guard.shares.entry(user_id).or_default();
        for share in entries.iter_mut() {
            if share.is_active {
                share.is_active = false;
                share.updated_at = Utc::now();
            }
        }

        let now = Utc::now();
        let share = ProjectShare {
            id: Uuid::new_v4(),
            user_id,
            percent,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        entries.push(share.clone());
        drop(guard);

        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor_id),
                action: "PROJECT_SHARE_SET".to_string(),
                entity_type: "project_share".to_string(),
                entity_id: Some(user_id.to_string()),
                payload: AuditPayload::transition(
                    serde_json::Value::Null,
                    serde_json::json!({
                        "user_id": user_id,
                        "percent": percent.as_hundredths(),
                    }),
                ),
            })
            .await;

        info!(share_id = %share.id, user_id, "project share updated");
        Ok(share)
    }

    async fn active_share_for(&self, user_id: UserId) -> LinkResult<Option<ProjectShare>> {
        let guard = self.state.lock().await;
        Ok(guard
            .shares
            .get(&user_id)
            .and_then(|entries| entries.iter().find(|share| share.is_active).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_access::InMemoryAccessGate;
    use fieldops_access::PrivilegedIds;
    use fieldops_audit::InMemoryAuditLog;
    use pretty_assertions::assert_eq;

    async fn harness() -> (Arc<InMemoryAccessGate>, InMemoryLinkRegistry) {
        let (access, _audit, registry) = harness_with_audit().await;
        (access, registry)
    }

    async fn harness_with_audit() -> (Arc<InMemoryAccessGate>, Arc<InMemoryAuditLog>, InMemoryLinkRegistry) {
        let access = Arc::new(InMemoryAccessGate::new(PrivilegedIds::default()));
        let audit = Arc::new(InMemoryAuditLog::default());
        let registry = InMemoryLinkRegistry::new(access.clone(), audit.clone());
        (access, audit, registry)
    }

    async fn seed(access: &InMemoryAccessGate, id: UserId, role: Role) {
        access.ensure_actor(id, None, None).await.unwrap();
        access.set_role(id, role).await.unwrap();
    }

    #[tokio::test]
    async fn link_requires_admin_actor_and_matching_roles() {
        let (access, registry) = harness().await;
        seed(&access, 1, Role::Admin).await;
        seed(&access, 2, Role::Master).await;
        seed(&access, 3, Role::JuniorMaster).await;

        let link = registry
            .link(2, 3, Percent::from_decimal(30.0).unwrap(), 1)
            .await
            .unwrap();
        assert!(link.is_active);

        let second = registry
            .link(2, 3, Percent::from_decimal(10.0).unwrap(), 1)
            .await;
        assert!(matches!(second, Err(LinkError::Conflict(_))));
    }

    #[tokio::test]
    async fn set_percent_sole_junior_requires_admin() {
        let (access, registry) = harness().await;
        seed(&access, 1, Role::Admin).await;
        seed(&access, 2, Role::Master).await;
        seed(&access, 3, Role::JuniorMaster).await;
        let link = registry
            .link(2, 3, Percent::from_decimal(30.0).unwrap(), 1)
            .await
            .unwrap();

        let denied = registry
            .set_percent(link.id, Percent::from_decimal(40.0).unwrap(), 2)
            .await;
        assert!(matches!(denied, Err(LinkError::Denied(_))));

        let updated = registry
            .set_percent(link.id, Percent::from_decimal(40.0).unwrap(), 1)
            .await
            .unwrap();
        assert_eq!(updated.percent, Percent::from_decimal(40.0).unwrap());
    }

    #[tokio::test]
    async fn set_percent_shared_junior_allows_master_self() {
        let (access, registry) = harness().await;
        seed(&access, 1, Role::Admin).await;
        seed(&access, 2, Role::Master).await;
        seed(&access, 3, Role::JuniorMaster).await;
        seed(&access, 4, Role::JuniorMaster).await;
        registry
            .link(2, 3, Percent::from_decimal(30.0).unwrap(), 1)
            .await
            .unwrap();
        let second = registry
            .link(2, 4, Percent::from_decimal(20.0).unwrap(), 1)
            .await
            .unwrap();

        let updated = registry
            .set_percent(second.id, Percent::from_decimal(25.0).unwrap(), 2)
            .await
            .unwrap();
        assert_eq!(updated.percent, Percent::from_decimal(25.0).unwrap());
    }

    #[tokio::test]
    async fn relink_deactivates_current_and_creates_new() {
        let (access, registry) = harness().await;
        seed(&access, 1, Role::Admin).await;
        seed(&access, 2, Role::Master).await;
        seed(&access, 5, Role::Master).await;
        seed(&access, 3, Role::JuniorMaster).await;
        registry
            .link(2, 3, Percent::from_decimal(30.0).unwrap(), 1)
            .await
            .unwrap();

        let relinked = registry
            .relink(3, 5, Percent::from_decimal(50.0).unwrap(), 1)
            .await
            .unwrap();
        assert_eq!(relinked.master_id, 5);

        let active = registry.active_link_for_junior(3).await.unwrap().unwrap();
        assert_eq!(active.id, relinked.id);
    }

    #[tokio::test]
    async fn project_share_keeps_one_active_row_per_user() {
        let (_access, registry) = harness().await;
        let first = registry
            .set_share(7, Percent::from_decimal(5.0).unwrap(), 1)
            .await
            .unwrap();
        let second = registry
            .set_share(7, Percent::from_decimal(8.0).unwrap(), 1)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let active = registry.active_share_for(7).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
    }

    #[tokio::test]
    async fn link_mutations_are_all_audited() {
        let (access, audit, registry) = harness_with_audit().await;
        seed(&access, 1, Role::Admin).await;
        seed(&access, 2, Role::Master).await;
        seed(&access, 5, Role::Master).await;
        seed(&access, 3, Role::JuniorMaster).await;

        let link = registry
            .link(2, 3, Percent::from_decimal(30.0).unwrap(), 1)
            .await
            .unwrap();
        registry
            .set_percent(link.id, Percent::from_decimal(40.0).unwrap(), 1)
            .await
            .unwrap();
        let relinked = registry
            .relink(3, 5, Percent::from_decimal(50.0).unwrap(), 1)
            .await
            .unwrap();
        registry.disable(relinked.id, 1).await.unwrap();

        let events = audit
            .audit_events(fieldops_audit::AuditEventFilter {
                entity_type: Some("master_junior_link".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        for action in [
            "JUNIOR_LINK_CREATED",
            "JUNIOR_LINK_PERCENT_SET",
            "JUNIOR_RELINKED",
            "JUNIOR_LINK_DISABLED",
        ] {
            assert!(
                events.iter().any(|event| event.action == action),
                "missing audit event for {action}"
            );
        }
    }
}
