use peerchat_lib::store::{Accounts, Contacts, FileStore, KeyValueStore, MessageLog};
use peerchat_lib::{Message, StoreError};
use std::sync::Arc;

fn open(dir: &tempfile::TempDir) -> Arc<dyn KeyValueStore> {
    Arc::new(FileStore::open(dir.path().join("data").join("peerchat.json")).unwrap())
}

#[test]
fn account_contacts_and_history_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (alice, bob) = {
        let store = open(&dir);
        let accounts = Accounts::new(store.clone());
        let bob = accounts.register("bob", "hunter2").unwrap();
        let alice = accounts.register("alice", "secret").unwrap();

        let contacts = Contacts::new(store.clone(), &alice.uuid);
        contacts.add(&bob.uuid).unwrap();

        let log = MessageLog::new(store);
        let mut first = Message::new(&alice.uuid, &bob.uuid, "hi bob");
        first.timestamp = 1_000;
        let mut reply = Message::new(&bob.uuid, &alice.uuid, "hi alice");
        reply.timestamp = 2_000;
        log.save(&reply).unwrap();
        log.save(&first).unwrap();
        (alice, bob)
    };

    let store = open(&dir);
    let accounts = Accounts::new(store.clone());
    assert_eq!(accounts.current().unwrap(), Some(alice.clone()));
    assert!(matches!(
        accounts.register("alice", "again"),
        Err(StoreError::UsernameTaken(_))
    ));
    assert_eq!(accounts.login("bob", "hunter2").unwrap(), Some(bob.clone()));

    let contacts = Contacts::new(store.clone(), &alice.uuid);
    let listed = contacts.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uuid, bob.uuid);
    // contact lists are per owner
    assert!(Contacts::new(store.clone(), &bob.uuid).list().unwrap().is_empty());

    let texts: Vec<_> = MessageLog::new(store)
        .conversation(&alice.uuid, &bob.uuid)
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, ["hi bob", "hi alice"]);
}

#[test]
fn logout_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let accounts = Accounts::new(open(&dir));
        accounts.register("carol", "pw").unwrap();
        accounts.logout().unwrap();
    }
    let accounts = Accounts::new(open(&dir));
    assert_eq!(accounts.current().unwrap(), None);
    assert!(accounts.login("carol", "wrong").unwrap().is_none());
    assert!(accounts.login("carol", "pw").unwrap().is_some());
}
