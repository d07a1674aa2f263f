use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::AccessError;
use crate::AccessGate;
use crate::AccessResult;
use crate::Percent;
use crate::PrivilegedIds;
use crate::Role;
use crate::User;
use crate::UserId;

#[derive(Default)]
struct AccessState {
    users: HashMap<UserId, User>,
}

pub struct InMemoryAccessGate {
    privileged: PrivilegedIds,
    state: RwLock<AccessState>,
}

impl InMemoryAccessGate {
    #[must_use]
    pub fn new(privileged: PrivilegedIds) -> Self {
        Self {
            privileged,
            state: RwLock::new(AccessState::default()),
        }
    }

    #[must_use]
    pub fn with_users(privileged: PrivilegedIds, users: Vec<User>) -> Self {
        let mut by_id = HashMap::new();
        for user in users {
            by_id.insert(user.id, user);
        }
        Self {
            privileged,
            state: RwLock::new(AccessState { users: by_id }),
        }
    }

    pub async fn export_users(&self) -> Vec<User> {
        let guard = self.state.read().await;
        guard.users.values().cloned().collect()
    }

    fn require<'a>(state: &'a AccessState, id: UserId) -> AccessResult<&'a User> {
        state.users.get(&id).ok_or(AccessError::NotFound(id))
    }
}

#[async_trait::async_trait]
impl AccessGate for InMemoryAccessGate {
    async fn ensure_actor(
        &self,
        external_id: UserId,
        display_name: Option<String>,
        username: Option<String>,
    ) -> AccessResult<User> {
        let mut guard = self.state.write().await;
        let promoted = self.privileged.classify(external_id);
        let user = guard
            .users
            .entry(external_id)
            .or_insert_with(|| User::new(external_id, display_name.clone(), username.clone()));

        if display_name.is_some() {
            user.display_name = display_name;
        }
        if username.is_some() {
            user.username = username;
        }

        if let Some(target_role) = promoted
            && target_role.rank() > user.role.rank()
        {
            user.role = target_role;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn get_user(&self, id: UserId) -> AccessResult<User> {
        let guard = self.state.read().await;
        Self::require(&guard, id).cloned()
    }

    async fn list_users(&self) -> AccessResult<Vec<User>> {
        let guard = self.state.read().await;
        let mut users: Vec<_> = guard.users.values().cloned().collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }

    async fn set_role(&self, id: UserId, role: Role) -> AccessResult<User> {
        let mut guard = self.state.write().await;
        let user = guard.users.get_mut(&id).ok_or(AccessError::NotFound(id))?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_active(&self, id: UserId, is_active: bool) -> AccessResult<User> {
        let mut guard = self.state.write().await;
        let user = guard.users.get_mut(&id).ok_or(AccessError::NotFound(id))?;
        user.is_active = is_active;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_master_percent(
        &self,
        id: UserId,
        percent: Option<Percent>,
    ) -> AccessResult<User> {
        let mut guard = self.state.write().await;
        let user = guard.users.get_mut(&id).ok_or(AccessError::NotFound(id))?;
        user.master_percent = percent;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_admin_percent(&self, id: UserId, percent: Option<Percent>) -> AccessResult<User> {
        let mut guard = self.state.write().await;
        let user = guard.users.get_mut(&id).ok_or(AccessError::NotFound(id))?;
        user.admin_percent = percent;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn privileged() -> PrivilegedIds {
        PrivilegedIds {
            super_admin: Some(1),
            sys_admins: vec![2, 3],
        }
    }

    #[tokio::test]
    async fn ensure_actor_upserts_and_refreshes_display_name() {
        let gate = InMemoryAccessGate::new(PrivilegedIds::default());
        let first = gate
            .ensure_actor(42, Some("Alice".into()), None)
            .await
            .expect("first contact");
        assert_eq!(first.role, Role::User);

        let second = gate
            .ensure_actor(42, Some("Alice Renamed".into()), Some("alice".into()))
            .await
            .expect("second contact");
        assert_eq!(second.display_name, Some("Alice Renamed".into()));
        assert_eq!(second.username, Some("alice".into()));
    }

    #[tokio::test]
    async fn ensure_actor_promotes_super_admin_once() {
        let gate = InMemoryAccessGate::new(privileged());
        let user = gate.ensure_actor(1, None, None).await.expect("ensure");
        assert_eq!(user.role, Role::SuperAdmin);
    }

    #[tokio::test]
    async fn ensure_actor_promotes_sys_admin_but_never_demotes() {
        let gate = InMemoryAccessGate::new(privileged());
        let user = gate.ensure_actor(2, None, None).await.expect("ensure");
        assert_eq!(user.role, Role::SysAdmin);

        gate.set_role(2, Role::SuperAdmin)
            .await
            .expect("explicit promotion");
        let user = gate.ensure_actor(2, None, None).await.expect("re-contact");
        assert_eq!(
            user.role,
            Role::SuperAdmin,
            "promotion logic must never demote an explicitly assigned role"
        );
    }

    #[tokio::test]
    async fn set_role_bypasses_rank_check() {
        let gate = InMemoryAccessGate::new(PrivilegedIds::default());
        gate.ensure_actor(9, None, None).await.expect("ensure");
        gate.set_role(9, Role::Admin)
            .await
            .expect("admin can assign any role");
        let demoted = gate
            .set_role(9, Role::User)
            .await
            .expect("explicit assignment is not rank-checked");
        assert_eq!(demoted.role, Role::User);
    }

    #[tokio::test]
    async fn get_user_reports_not_found() {
        let gate = InMemoryAccessGate::new(PrivilegedIds::default());
        let err = gate.get_user(123).await.unwrap_err();
        assert!(matches!(err, AccessError::NotFound(123)));
    }

    #[tokio::test]
    async fn with_users_seeds_snapshot() {
        let seeded = User {
            id: 5,
            role: Role::Master,
            is_active: true,
            display_name: Some("Seed".into()),
            username: None,
            master_percent: Some(Percent::from_decimal(40.0).expect("valid")),
            admin_percent: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let gate = InMemoryAccessGate::with_users(PrivilegedIds::default(), vec![seeded.clone()]);
        let fetched = gate.get_user(5).await.expect("seeded user");
        assert_eq!(fetched, seeded);
        assert_eq!(gate.export_users().await.len(), 1);
    }
}
