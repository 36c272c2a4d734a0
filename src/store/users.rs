use crate::error::{StoreError, StoreResult};
use crate::store::{avatar, load, save, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const USERS_KEY: &str = "users";
const CURRENT_USER_KEY: &str = "currentUser";

/// Local account. The uuid doubles as the broker identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uuid: String,
    pub username: String,
    // stored as typed; accounts are device-local
    pub password: String,
    pub name: String,
    pub avatar: String,
}

/// Account registry plus the signed-in user
#[derive(Clone)]
pub struct Accounts {
    store: Arc<dyn KeyValueStore>,
}

impl Accounts {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn users(&self) -> StoreResult<Vec<User>> {
        load(self.store.as_ref(), USERS_KEY)
    }

    /// Creates an account and signs it in
    pub fn register(&self, username: &str, password: &str) -> StoreResult<User> {
        let mut users = self.users()?;
        if users.iter().any(|u| u.username == username) {
            return Err(StoreError::UsernameTaken(username.to_string()));
        }
        let uuid = Uuid::new_v4().to_string();
        let user = User {
            avatar: avatar::dicebear_url(&uuid, 100),
            uuid,
            username: username.to_string(),
            password: password.to_string(),
            name: username.to_string(),
        };
        users.push(user.clone());
        save(self.store.as_ref(), USERS_KEY, &users)?;
        save(self.store.as_ref(), CURRENT_USER_KEY, &user)?;
        info!(username, uuid = %user.uuid, "account registered");
        Ok(user)
    }

    /// Signs in on an exact username and password match
    pub fn login(&self, username: &str, password: &str) -> StoreResult<Option<User>> {
        let user = self
            .users()?
            .into_iter()
            .find(|u| u.username == username && u.password == password);
        match &user {
            Some(user) => save(self.store.as_ref(), CURRENT_USER_KEY, user)?,
            None => debug!(username, "login rejected"),
        }
        Ok(user)
    }

    pub fn current(&self) -> StoreResult<Option<User>> {
        load(self.store.as_ref(), CURRENT_USER_KEY)
    }

    /// Replaces the stored profile of `user` and makes it current
    pub fn update(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users()?;
        let slot = users
            .iter_mut()
            .find(|u| u.uuid == user.uuid)
            .ok_or_else(|| StoreError::UnknownUser(user.uuid.clone()))?;
        *slot = user.clone();
        save(self.store.as_ref(), USERS_KEY, &users)?;
        save(self.store.as_ref(), CURRENT_USER_KEY, user)
    }

    pub fn logout(&self) -> StoreResult<()> {
        self.store.remove(CURRENT_USER_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn accounts() -> Accounts {
        Accounts::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn usernames_are_unique() {
        let accounts = accounts();
        let alice = accounts.register("alice", "pw").unwrap();
        assert_eq!(alice.name, "alice");
        assert!(alice.avatar.contains(&alice.uuid));
        assert!(matches!(accounts.register("alice", "other"), Err(StoreError::UsernameTaken(_))));
    }

    #[test]
    fn login_needs_exact_credentials() {
        let accounts = accounts();
        let alice = accounts.register("alice", "pw").unwrap();
        accounts.logout().unwrap();
        assert_eq!(accounts.current().unwrap(), None);

        assert_eq!(accounts.login("alice", "PW").unwrap(), None);
        assert_eq!(accounts.login("alice", "pw").unwrap(), Some(alice.clone()));
        assert_eq!(accounts.current().unwrap(), Some(alice));
    }

    #[test]
    fn update_rewrites_profile() {
        let accounts = accounts();
        let mut alice = accounts.register("alice", "pw").unwrap();
        alice.name = "Alice L.".into();
        accounts.update(&alice).unwrap();
        assert_eq!(accounts.current().unwrap().unwrap().name, "Alice L.");
        assert_eq!(accounts.login("alice", "pw").unwrap().unwrap().name, "Alice L.");

        let mut ghost = alice.clone();
        ghost.uuid = "nobody".into();
        assert!(matches!(accounts.update(&ghost), Err(StoreError::UnknownUser(_))));
    }
}
