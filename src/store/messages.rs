use crate::envelope::Message;
use crate::error::StoreResult;
use crate::store::{load, save, KeyValueStore};
use std::sync::Arc;

/// Message history, one list per direction under `{sender}_{receiver}_messages`
#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn KeyValueStore>,
}

fn key(sender: &str, receiver: &str) -> String {
    format!("{sender}_{receiver}_messages")
}

impl MessageLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, message: &Message) -> StoreResult<()> {
        let key = key(&message.sender, &message.receiver);
        let mut messages: Vec<Message> = load(self.store.as_ref(), &key)?;
        messages.push(message.clone());
        save(self.store.as_ref(), &key, &messages)
    }

    /// Messages `sender` sent to `receiver`, oldest first
    pub fn sent(&self, sender: &str, receiver: &str) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = load(self.store.as_ref(), &key(sender, receiver))?;
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    /// Both directions between `me` and `peer`, oldest first
    pub fn conversation(&self, me: &str, peer: &str) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = load(self.store.as_ref(), &key(me, peer))?;
        if me != peer {
            messages.extend(load::<Vec<Message>>(self.store.as_ref(), &key(peer, me))?);
        }
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }
}
