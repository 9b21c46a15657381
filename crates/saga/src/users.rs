//! User lookups over the `user.getUser` request/reply topic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::UserId;
use domain::{User, topics};
use event_bus::{BusError, EventBus, RequestClient};
use tokio::task::JoinHandle;

use crate::error::Result;

/// Resolves the user placing an order.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the user, or `None` if the directory does not know it.
    async fn find_user(&self, id: &UserId) -> Result<Option<User>>;
}

/// Looks users up through the bus.
///
/// An unanswered request counts as an unknown user.
#[derive(Clone)]
pub struct BusUserDirectory<B: EventBus + Clone> {
    client: RequestClient<B>,
}

impl<B: EventBus + Clone> BusUserDirectory<B> {
    /// Subscribes to the reply topic as `group`.
    pub async fn connect(bus: B, group: &str, timeout: Duration) -> Result<Self> {
        let client = RequestClient::connect(bus, topics::USER_GET_USER, group, timeout).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl<B: EventBus + Clone> UserDirectory for BusUserDirectory<B> {
    #[tracing::instrument(skip(self))]
    async fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        match self.client.request(id.as_str()).await {
            Ok(serde_json::Value::Null) => Ok(None),
            Ok(value) => Ok(Some(serde_json::from_value(value)?)),
            Err(BusError::Timeout { after, .. }) => {
                tracing::warn!(user_id = %id, ?after, "user lookup unanswered, treating as unknown");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Fixed set of users, used as the directory responder and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory holding the given users.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.insert(user);
        }
        directory
    }

    /// Adds or replaces a user.
    pub fn insert(&self, user: User) {
        self.users
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(user.id.clone(), user);
    }

    /// Returns the user with the given id.
    pub fn get(&self, id: &UserId) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.get(id))
    }
}

/// Answers `user.getUser` requests from `directory`.
///
/// The request payload is the bare user id string; the reply is the user or
/// `null`.
pub async fn serve_user_directory<B: EventBus + Clone>(
    bus: B,
    group: &str,
    directory: InMemoryUserDirectory,
) -> Result<JoinHandle<()>> {
    let handle = event_bus::serve_requests(bus, topics::USER_GET_USER, group, move |request| {
        let directory = directory.clone();
        async move {
            let user = request
                .as_str()
                .map(UserId::new)
                .and_then(|id| directory.get(&id));
            match user {
                Some(user) => serde_json::to_value(user).unwrap_or(serde_json::Value::Null),
                None => serde_json::Value::Null,
            }
        }
    })
    .await?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use event_bus::InMemoryEventBus;

    use super::*;

    #[tokio::test]
    async fn bus_lookup_finds_known_user() {
        let bus = InMemoryEventBus::new(3);
        let directory = InMemoryUserDirectory::with_users([User::new("user1").with_name("Ada")]);
        let _responder = serve_user_directory(bus.clone(), "users", directory)
            .await
            .unwrap();

        let users = BusUserDirectory::connect(bus, "orders-users", Duration::from_secs(1))
            .await
            .unwrap();

        let user = users.find_user(&UserId::new("user1")).await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("Ada"));
        assert!(users.find_user(&UserId::new("user404")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_lookup_is_unknown_user() {
        let bus = InMemoryEventBus::new(1);
        let users = BusUserDirectory::connect(bus, "orders-users", Duration::from_millis(200))
            .await
            .unwrap();

        assert!(users.find_user(&UserId::new("user1")).await.unwrap().is_none());
    }
}
