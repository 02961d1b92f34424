//! External collaborator boundary (§6): durable storage for messages,
//! contacts, and queue state. The engine only ever talks to the `Store`
//! trait; a concrete host picks SQLite, sled, or whatever fits the
//! platform. `InMemoryStore` below is a reference implementation used by
//! tests and as a default for hosts that don't need durability.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::Result;
use crate::protocol::envelope::{Priority, SeenKind};
use crate::protocol::{MessageId, NodeId};

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: MessageId,
    pub chat_id: String,
    pub sender: NodeId,
    pub recipient: NodeId,
    pub content: Vec<u8>,
    pub created_at_millis: u64,
}

#[derive(Debug, Clone)]
pub struct Contact {
    pub node_id: NodeId,
    pub display_name: String,
    pub last_seen_millis: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct QueueItemRecord {
    pub id: MessageId,
    pub chat_id: String,
    pub sender: NodeId,
    pub recipient: NodeId,
    pub content: Vec<u8>,
    pub priority: Priority,
}

/// Indexed by message id (messages, queue items, tombstones, seen-store
/// entries) and by node id (contacts), per §6.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_message(&self, message: StoredMessage) -> Result<()>;
    async fn get_message(&self, id: &MessageId) -> Result<Option<StoredMessage>>;
    async fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<StoredMessage>>;

    async fn put_contact(&self, contact: Contact) -> Result<()>;
    async fn get_contact(&self, node_id: &NodeId) -> Result<Option<Contact>>;
    async fn update_contact_last_seen(&self, node_id: &NodeId, last_seen_millis: u64) -> Result<()>;

    async fn put_queue_item(&self, item: QueueItemRecord) -> Result<()>;
    async fn remove_queue_item(&self, id: &MessageId) -> Result<()>;
    async fn queue_items(&self) -> Result<Vec<QueueItemRecord>>;

    async fn put_queue_tombstone(&self, id: MessageId, deleted_at_millis: u64) -> Result<()>;
    async fn queue_tombstones(&self) -> Result<Vec<(MessageId, u64)>>;

    async fn mark_seen(&self, id: &MessageId, kind: SeenKind) -> Result<()>;
    async fn has_seen(&self, id: &MessageId, kind: SeenKind) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryStore {
    messages: DashMap<MessageId, StoredMessage>,
    contacts: DashMap<NodeId, Contact>,
    queue_items: DashMap<MessageId, QueueItemRecord>,
    tombstones: RwLock<Vec<(MessageId, u64)>>,
    seen: DashMap<(MessageId, SeenKind), ()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_message(&self, message: StoredMessage) -> Result<()> {
        self.messages.insert(message.id.clone(), message);
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<StoredMessage>> {
        Ok(self.messages.get(id).map(|m| m.clone()))
    }

    async fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .iter()
            .filter(|entry| entry.value().chat_id == chat_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn put_contact(&self, contact: Contact) -> Result<()> {
        self.contacts.insert(contact.node_id, contact);
        Ok(())
    }

    async fn get_contact(&self, node_id: &NodeId) -> Result<Option<Contact>> {
        Ok(self.contacts.get(node_id).map(|c| c.clone()))
    }

    async fn update_contact_last_seen(&self, node_id: &NodeId, last_seen_millis: u64) -> Result<()> {
        if let Some(mut contact) = self.contacts.get_mut(node_id) {
            contact.last_seen_millis = Some(last_seen_millis);
        }
        Ok(())
    }

    async fn put_queue_item(&self, item: QueueItemRecord) -> Result<()> {
        self.queue_items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn remove_queue_item(&self, id: &MessageId) -> Result<()> {
        self.queue_items.remove(id);
        Ok(())
    }

    async fn queue_items(&self) -> Result<Vec<QueueItemRecord>> {
        Ok(self.queue_items.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn put_queue_tombstone(&self, id: MessageId, deleted_at_millis: u64) -> Result<()> {
        self.tombstones.write().push((id, deleted_at_millis));
        Ok(())
    }

    async fn queue_tombstones(&self) -> Result<Vec<(MessageId, u64)>> {
        Ok(self.tombstones.read().clone())
    }

    async fn mark_seen(&self, id: &MessageId, kind: SeenKind) -> Result<()> {
        self.seen.insert((id.clone(), kind), ());
        Ok(())
    }

    async fn has_seen(&self, id: &MessageId, kind: SeenKind) -> Result<bool> {
        Ok(self.seen.contains_key(&(id.clone(), kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(b: u8) -> NodeId {
        [b; 32]
    }

    #[tokio::test]
    async fn put_and_get_message_round_trips() {
        let store = InMemoryStore::new();
        let message = StoredMessage {
            id: vec![1, 2, 3],
            chat_id: "chat-a".into(),
            sender: node(1),
            recipient: node(2),
            content: b"hi".to_vec(),
            created_at_millis: 1000,
        };
        store.put_message(message.clone()).await.unwrap();
        let fetched = store.get_message(&message.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, b"hi");
    }

    #[tokio::test]
    async fn messages_for_chat_filters_by_chat_id() {
        let store = InMemoryStore::new();
        for (n, chat) in [(1u8, "a"), (2, "a"), (3, "b")] {
            store
                .put_message(StoredMessage {
                    id: vec![n],
                    chat_id: chat.into(),
                    sender: node(n),
                    recipient: node(9),
                    content: vec![],
                    created_at_millis: 0,
                })
                .await
                .unwrap();
        }
        let chat_a = store.messages_for_chat("a").await.unwrap();
        assert_eq!(chat_a.len(), 2);
    }

    #[tokio::test]
    async fn seen_store_round_trips_per_kind() {
        let store = InMemoryStore::new();
        let id = vec![1, 2, 3];
        assert!(!store.has_seen(&id, SeenKind::Delivered).await.unwrap());
        store.mark_seen(&id, SeenKind::Delivered).await.unwrap();
        assert!(store.has_seen(&id, SeenKind::Delivered).await.unwrap());
        assert!(!store.has_seen(&id, SeenKind::Read).await.unwrap());
    }

    #[tokio::test]
    async fn contact_last_seen_updates_in_place() {
        let store = InMemoryStore::new();
        store
            .put_contact(Contact { node_id: node(1), display_name: "alice".into(), last_seen_millis: None })
            .await
            .unwrap();
        store.update_contact_last_seen(&node(1), 5000).await.unwrap();
        let contact = store.get_contact(&node(1)).await.unwrap().unwrap();
        assert_eq!(contact.last_seen_millis, Some(5000));
    }
}
