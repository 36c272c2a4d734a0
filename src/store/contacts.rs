use crate::error::{StoreError, StoreResult};
use crate::store::{avatar, load, save, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub uuid: String,
    pub name: String,
    pub avatar: String,
}

impl Contact {
    /// Contact with the default display name `Contact <first 8 chars>`
    pub fn named_after(uuid: &str) -> Self {
        let short: String = uuid.chars().take(8).collect();
        Self {
            uuid: uuid.to_string(),
            name: format!("Contact {short}"),
            avatar: avatar::dicebear_url(uuid, 40),
        }
    }
}

/// Contact list of one owner, kept under `{owner}_contacts`
#[derive(Clone)]
pub struct Contacts {
    store: Arc<dyn KeyValueStore>,
    owner: String,
}

impl Contacts {
    pub fn new(store: Arc<dyn KeyValueStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }

    fn key(&self) -> String {
        format!("{}_contacts", self.owner)
    }

    pub fn list(&self) -> StoreResult<Vec<Contact>> {
        load(self.store.as_ref(), &self.key())
    }

    /// Adds `uuid` unless already present; returns the stored entry either way
    pub fn add(&self, uuid: &str) -> StoreResult<Contact> {
        let uuid = uuid.trim();
        if uuid == self.owner {
            return Err(StoreError::SelfContact);
        }
        let mut contacts = self.list()?;
        if let Some(existing) = contacts.iter().find(|c| c.uuid == uuid) {
            debug!(uuid, "contact already known");
            return Ok(existing.clone());
        }
        let contact = Contact::named_after(uuid);
        contacts.push(contact.clone());
        save(self.store.as_ref(), &self.key(), &contacts)?;
        Ok(contact)
    }

    pub fn get(&self, uuid: &str) -> StoreResult<Option<Contact>> {
        Ok(self.list()?.into_iter().find(|c| c.uuid == uuid))
    }

    /// Case-insensitive substring match on the display name
    pub fn search(&self, term: &str) -> StoreResult<Vec<Contact>> {
        let term = term.to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.name.to_lowercase().contains(&term))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const BOB: &str = "b0b0b0b0-1111-4222-8333-444455556666";

    #[test]
    fn add_dedupes_and_names_by_prefix() {
        let contacts = Contacts::new(Arc::new(MemoryStore::new()), "alice-uuid");
        let bob = contacts.add(BOB).unwrap();
        assert_eq!(bob.name, "Contact b0b0b0b0");
        contacts.add(BOB).unwrap();
        assert_eq!(contacts.list().unwrap().len(), 1);
        assert_eq!(contacts.get(BOB).unwrap(), Some(bob));
    }

    #[test]
    fn cannot_add_self() {
        let contacts = Contacts::new(Arc::new(MemoryStore::new()), "alice-uuid");
        assert!(matches!(contacts.add("alice-uuid"), Err(StoreError::SelfContact)));
        assert!(contacts.list().unwrap().is_empty());
    }

    #[test]
    fn search_ignores_case() {
        let contacts = Contacts::new(Arc::new(MemoryStore::new()), "alice-uuid");
        contacts.add(BOB).unwrap();
        contacts.add("c4a7e000-0000-4000-8000-000000000000").unwrap();
        let hits = contacts.search("CONTACT B0").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uuid, BOB);
        assert_eq!(contacts.search("").unwrap().len(), 2);
    }

    #[test]
    fn lists_are_per_owner() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Contacts::new(store.clone(), "alice-uuid").add(BOB).unwrap();
        assert!(Contacts::new(store, "carol-uuid").list().unwrap().is_empty());
    }
}
