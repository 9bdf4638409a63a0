/// Message stream subscriber.
/// One push subscription per conversation, each moving through
/// `Unsubscribed -> Subscribing -> Active -> Unsubscribed`. Deliveries from
/// all subscriptions are funnelled into a single queue drained by the owner;
/// anything still in flight for a torn-down subscription is dropped when it
/// is dequeued.

use crate::backend::{decode, Backend, Filter, PushEvent, SubscriptionHandle};
use crate::error::Result;
use crate::models::{collections, ConversationId, Message};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryKind {
    Message(Message),
    /// The channel failed; the subscription is now `Unsubscribed`
    Closed(String),
    /// The pushed row could not be read as a message
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub conversation_id: ConversationId,
    pub generation: u64,
    pub kind: DeliveryKind,
}

struct ActiveChannel {
    generation: u64,
    handle: SubscriptionHandle,
    forwarder: JoinHandle<()>,
}

pub struct MessageSubscriber {
    backend: Arc<dyn Backend>,
    states: HashMap<ConversationId, SubscriptionState>,
    channels: HashMap<ConversationId, ActiveChannel>,
    next_generation: u64,
    deliveries_tx: mpsc::UnboundedSender<Delivery>,
    deliveries_rx: mpsc::UnboundedReceiver<Delivery>,
}

impl MessageSubscriber {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        MessageSubscriber {
            backend,
            states: HashMap::new(),
            channels: HashMap::new(),
            next_generation: 1,
            deliveries_tx,
            deliveries_rx,
        }
    }

    pub fn state(&self, conversation_id: &ConversationId) -> SubscriptionState {
        self.states
            .get(conversation_id)
            .copied()
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    pub fn active_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| **s == SubscriptionState::Active)
            .count()
    }

    /// Open the message subscription for a conversation, tearing down any
    /// existing one first. Resolves once the backend confirms the channel.
    pub async fn subscribe(&mut self, conversation_id: &ConversationId) -> Result<()> {
        if self.channels.contains_key(conversation_id) {
            self.unsubscribe(conversation_id);
        }

        self.set_state(conversation_id, SubscriptionState::Subscribing);
        let subscription = match self
            .backend
            .subscribe(
                collections::MESSAGES,
                &Filter::eq("conversation_id", conversation_id),
            )
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                log::warn!("Subscribing to {} failed: {}", conversation_id, e);
                self.set_state(conversation_id, SubscriptionState::Unsubscribed);
                return Err(e);
            }
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        let (handle, mut events) = subscription.into_parts();
        let tx = self.deliveries_tx.clone();
        let id = conversation_id.clone();

        let forwarder = tokio::spawn(async move {
            let deliver = |kind| Delivery {
                conversation_id: id.clone(),
                generation,
                kind,
            };
            while let Some(event) = events.recv().await {
                let (kind, last) = match event {
                    PushEvent::Insert(row) => match decode::<Message>(row) {
                        Ok(message) => (DeliveryKind::Message(message), false),
                        Err(e) => (DeliveryKind::Malformed(e.to_string()), false),
                    },
                    PushEvent::Error(reason) => (DeliveryKind::Closed(reason), true),
                };
                if tx.send(deliver(kind)).is_err() || last {
                    return;
                }
            }
            let _ = tx.send(deliver(DeliveryKind::Closed("Subscription ended".to_string())));
        });

        self.channels.insert(
            conversation_id.clone(),
            ActiveChannel {
                generation,
                handle,
                forwarder,
            },
        );
        self.set_state(conversation_id, SubscriptionState::Active);
        Ok(())
    }

    /// Tear down a conversation's subscription. No-op when not subscribed.
    pub fn unsubscribe(&mut self, conversation_id: &ConversationId) {
        if let Some(mut channel) = self.channels.remove(conversation_id) {
            channel.handle.unsubscribe();
            channel.forwarder.abort();
        }
        self.set_state(conversation_id, SubscriptionState::Unsubscribed);
    }

    pub fn unsubscribe_all(&mut self) {
        let ids: Vec<ConversationId> = self.channels.keys().cloned().collect();
        for id in ids {
            self.unsubscribe(&id);
        }
    }

    /// Next delivery from a live subscription. Deliveries from subscriptions
    /// that have since been torn down or replaced are discarded.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            let delivery = self.deliveries_rx.recv().await?;
            let current = self
                .channels
                .get(&delivery.conversation_id)
                .map(|c| c.generation);
            if current != Some(delivery.generation) {
                log::debug!(
                    "Dropping stale delivery for {} (generation {})",
                    delivery.conversation_id,
                    delivery.generation
                );
                continue;
            }
            if let DeliveryKind::Closed(reason) = &delivery.kind {
                log::warn!("Subscription to {} closed: {}", delivery.conversation_id, reason);
                self.channels.remove(&delivery.conversation_id);
                self.set_state(&delivery.conversation_id, SubscriptionState::Unsubscribed);
            }
            return Some(delivery);
        }
    }

    fn set_state(&mut self, conversation_id: &ConversationId, state: SubscriptionState) {
        log::debug!("Subscription {} -> {:?}", conversation_id, state);
        if state == SubscriptionState::Unsubscribed {
            self.states.remove(conversation_id);
        } else {
            self.states.insert(conversation_id.clone(), state);
        }
    }
}

impl Drop for MessageSubscriber {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;
    use std::time::Duration;

    fn backend_with(conversations: &[&str]) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(
            collections::CONVERSATIONS,
            conversations
                .iter()
                .map(|id| json!({ "id": id, "created_at": "2025-01-01T00:00:00Z" }))
                .collect(),
        );
        backend
    }

    async fn insert(backend: &MemoryBackend, conversation: &str, content: &str) {
        backend
            .insert_row(
                collections::MESSAGES,
                json!({ "conversation_id": conversation, "sender_id": "u1", "content": content }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_becomes_active() {
        let backend = backend_with(&["c1"]);
        let mut subscriber = MessageSubscriber::new(backend.clone());
        let c1 = ConversationId::from("c1");
        assert_eq!(subscriber.state(&c1), SubscriptionState::Unsubscribed);

        subscriber.subscribe(&c1).await.unwrap();
        assert_eq!(subscriber.state(&c1), SubscriptionState::Active);

        insert(&backend, "c1", "hello").await;
        let delivery = subscriber.next_delivery().await.unwrap();
        match delivery.kind {
            DeliveryKind::Message(m) => assert_eq!(m.content, "hello"),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_channel() {
        let backend = backend_with(&["c1"]);
        let mut subscriber = MessageSubscriber::new(backend.clone());
        let c1 = ConversationId::from("c1");
        subscriber.subscribe(&c1).await.unwrap();
        subscriber.subscribe(&c1).await.unwrap();

        assert_eq!(subscriber.active_count(), 1);
        assert_eq!(backend.active_subscriptions(collections::MESSAGES), 1);
    }

    #[tokio::test]
    async fn test_channel_error_moves_to_unsubscribed() {
        let backend = backend_with(&["c1"]);
        let mut subscriber = MessageSubscriber::new(backend.clone());
        let c1 = ConversationId::from("c1");
        subscriber.subscribe(&c1).await.unwrap();

        backend.fail_subscriptions(collections::MESSAGES, "socket dropped");
        let delivery = subscriber.next_delivery().await.unwrap();
        assert_eq!(delivery.kind, DeliveryKind::Closed("socket dropped".to_string()));
        assert_eq!(subscriber.state(&c1), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_unsubscribed_conversation_delivers_nothing() {
        let backend = backend_with(&["c1"]);
        let mut subscriber = MessageSubscriber::new(backend.clone());
        let c1 = ConversationId::from("c1");
        subscriber.subscribe(&c1).await.unwrap();
        subscriber.unsubscribe(&c1);

        insert(&backend, "c1", "late").await;
        let next = tokio::time::timeout(Duration::from_millis(100), subscriber.next_delivery()).await;
        assert!(next.is_err());
        assert_eq!(backend.active_subscriptions(collections::MESSAGES), 0);
    }

    #[tokio::test]
    async fn test_delivery_from_replaced_channel_is_dropped() {
        let backend = backend_with(&["c1"]);
        let mut subscriber = MessageSubscriber::new(backend.clone());
        let c1 = ConversationId::from("c1");
        subscriber.subscribe(&c1).await.unwrap();

        insert(&backend, "c1", "stale").await;
        // Queued by the first forwarder before the channel is replaced
        tokio::time::sleep(Duration::from_millis(20)).await;
        subscriber.subscribe(&c1).await.unwrap();
        insert(&backend, "c1", "fresh").await;

        let delivery = subscriber.next_delivery().await.unwrap();
        match delivery.kind {
            DeliveryKind::Message(m) => assert_eq!(m.content, "fresh"),
            other => panic!("unexpected delivery: {:?}", other),
        }
        let next = tokio::time::timeout(Duration::from_millis(100), subscriber.next_delivery()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_failed_subscribe_stays_unsubscribed() {
        let backend = backend_with(&["c1"]);
        backend.set_offline(true);
        let mut subscriber = MessageSubscriber::new(backend.clone());
        let c1 = ConversationId::from("c1");
        assert!(subscriber.subscribe(&c1).await.is_err());
        assert_eq!(subscriber.state(&c1), SubscriptionState::Unsubscribed);
    }
}
