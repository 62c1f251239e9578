use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ProviderIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub locale: Option<String>,
    // subject of the identity provider token this user logged in with
    pub auth_provider_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
}

impl User {
    pub fn from_identity(identity: &ProviderIdentity, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            locale: identity.locale.clone(),
            auth_provider_id: identity.subject.clone(),
            created_at: now,
            last_seen_at: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user {0} does not exist")]
    NotFound(Uuid),
    #[error("a user already exists for provider id {0}")]
    DuplicateProvider(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn get_by_provider_id(&self, provider_id: &str) -> Result<Option<User>, StoreError>;

    async fn create(&self, user: User) -> Result<User, StoreError>;

    async fn touch_last_seen(&self, id: Uuid, at: OffsetDateTime) -> Result<User, StoreError>;
}

/// Users kept in process memory, lost on restart.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_by_provider_id(&self, provider_id: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.auth_provider_id == provider_id)
            .cloned())
    }

    async fn create(&self, user: User) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.auth_provider_id == user.auth_provider_id)
        {
            return Err(StoreError::DuplicateProvider(user.auth_provider_id));
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn touch_last_seen(&self, id: Uuid, at: OffsetDateTime) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        user.last_seen_at = at;
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn identity(subject: &str) -> ProviderIdentity {
        ProviderIdentity {
            subject: subject.to_string(),
            name: Some("Ada".to_string()),
            email: Some("ada@example.com".to_string()),
            locale: None,
        }
    }

    #[tokio::test]
    async fn created_users_are_found_by_provider_id() {
        let store = MemoryUserStore::new();
        let now = OffsetDateTime::now_utc();
        let user = store
            .create(User::from_identity(&identity("provider|42"), now))
            .await
            .unwrap();

        let found = store.get_by_provider_id("provider|42").await.unwrap();
        assert_eq!(found, Some(user.clone()));
        assert_eq!(store.get(user.id).await.unwrap(), Some(user));
        assert_eq!(store.get_by_provider_id("provider|43").await.unwrap(), None);
    }

    #[tokio::test]
    async fn one_user_per_provider_id() {
        let store = MemoryUserStore::new();
        let now = OffsetDateTime::now_utc();
        store
            .create(User::from_identity(&identity("provider|42"), now))
            .await
            .unwrap();

        let again = store
            .create(User::from_identity(&identity("provider|42"), now))
            .await;
        assert!(matches!(again, Err(StoreError::DuplicateProvider(_))));
    }

    #[tokio::test]
    async fn touching_moves_last_seen_only() {
        let store = MemoryUserStore::new();
        let created_at = OffsetDateTime::now_utc() - Duration::days(3);
        let user = store
            .create(User::from_identity(&identity("provider|42"), created_at))
            .await
            .unwrap();

        let later = created_at + Duration::days(2);
        let touched = store.touch_last_seen(user.id, later).await.unwrap();
        assert_eq!(touched.created_at, created_at);
        assert_eq!(touched.last_seen_at, later);

        let missing = store.touch_last_seen(Uuid::now_v7(), later).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }
}
