use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::models::User;

/// Persistent user records. Owned outside the credential core; it only
/// needs creation and lookup by email.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Fails with `StoreError::Duplicate` if the email is taken.
    async fn create(&self, user: &User) -> Result<Uuid, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> Result<Uuid, StoreError> {
        match self.users.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user.id)
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(email).map(|u| u.clone()))
    }
}
