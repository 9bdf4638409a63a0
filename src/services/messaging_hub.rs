/// Messaging hub.
/// Single owner of the conversation store, the open conversation's message
/// list and the subscriber. Push deliveries and send confirmations are both
/// applied here, through `&mut self`, so the local state needs no locking.

use super::conversation_store::ConversationStore;
use super::message_list::{get_messages, InsertOutcome, MessageList};
use super::message_sender::MessageSender;
use super::subscriber::{DeliveryKind, MessageSubscriber, SubscriptionState};
use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::models::{Conversation, ConversationId, Message, MessageId, MessageType, UserId};
use std::sync::Arc;

/// Change applied from the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// A new message was added to the open conversation
    MessageAppended {
        conversation_id: ConversationId,
        message: Message,
    },
    /// A conversation's latest-message snapshot changed
    SnapshotUpdated { conversation_id: ConversationId },
    /// The subscription failed and was not re-opened
    SubscriptionClosed {
        conversation_id: ConversationId,
        reason: String,
    },
    /// The subscription failed and was re-opened
    Resubscribed { conversation_id: ConversationId },
}

pub struct MessagingHub {
    user_id: UserId,
    backend: Arc<dyn Backend>,
    store: ConversationStore,
    messages: MessageList,
    subscriber: MessageSubscriber,
    sender: MessageSender,
    active: Option<ConversationId>,
    resubscribe_on_error: bool,
}

impl MessagingHub {
    pub fn new(backend: Arc<dyn Backend>, user_id: UserId) -> Self {
        MessagingHub {
            store: ConversationStore::new(backend.clone(), user_id.clone()),
            messages: MessageList::new(),
            subscriber: MessageSubscriber::new(backend.clone()),
            sender: MessageSender::new(backend.clone()),
            user_id,
            backend,
            active: None,
            resubscribe_on_error: false,
        }
    }

    pub fn with_resubscribe_on_error(mut self, enabled: bool) -> Self {
        self.resubscribe_on_error = enabled;
        self
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub async fn load_conversations(&mut self) -> Result<&[Conversation]> {
        let user_id = self.user_id.clone();
        self.store.load(&user_id).await
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.store.conversations()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.store.get(id)
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active.as_ref().and_then(|id| self.store.get(id))
    }

    /// Messages of the open conversation, oldest first
    pub fn messages(&self) -> &[Message] {
        self.messages.messages()
    }

    pub fn subscription_state(&self, id: &ConversationId) -> SubscriptionState {
        self.subscriber.state(id)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriber.active_count()
    }

    /// Open a conversation: tear down the previous subscription, subscribe to
    /// the new one, then load its history. A failed subscribe still leaves the
    /// history loaded and is reported to the caller. A failed history load
    /// closes the conversation again.
    pub async fn select_conversation(&mut self, id: &ConversationId) -> Result<()> {
        if !self.store.contains(id) {
            return Err(ClientError::NotFound(format!("Conversation {}", id)));
        }
        if let Some(previous) = self.active.take() {
            self.subscriber.unsubscribe(&previous);
        }
        self.messages.clear();
        self.active = Some(id.clone());

        let subscribed = self.subscriber.subscribe(id).await;
        let history = match get_messages(self.backend.as_ref(), id).await {
            Ok(history) => history,
            Err(e) => {
                log::warn!("Failed to load history of {}: {}", id, e);
                self.close_conversation();
                return Err(e);
            }
        };
        self.messages.reset(id.clone(), history);
        if let Some(latest) = self.messages.latest().cloned() {
            self.store.patch_latest_message(id, &latest);
        }
        log::info!("Opened conversation {} ({} messages)", id, self.messages.len());
        subscribed
    }

    /// Close the open conversation and its subscription
    pub fn close_conversation(&mut self) {
        if let Some(previous) = self.active.take() {
            self.subscriber.unsubscribe(&previous);
        }
        self.messages.clear();
    }

    /// Send text to a conversation. The message is appended locally only
    /// after the backend has stored it.
    pub async fn send(
        &mut self,
        conversation_id: &ConversationId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message> {
        if !self.store.contains(conversation_id) {
            return Err(ClientError::NotFound(format!("Conversation {}", conversation_id)));
        }
        let message = self
            .sender
            .send(conversation_id, &self.user_id, content, message_type)
            .await?;
        self.apply_confirmed(&message);
        Ok(message)
    }

    /// Upload a file and send it as an image or file message
    pub async fn send_attachment(
        &mut self,
        conversation_id: &ConversationId,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<Message> {
        if !self.store.contains(conversation_id) {
            return Err(ClientError::NotFound(format!("Conversation {}", conversation_id)));
        }
        let attachment = self
            .sender
            .upload_attachment(conversation_id, file_name, bytes)
            .await?;
        let message = self
            .sender
            .send_attachment(conversation_id, &self.user_id, &attachment, caption)
            .await?;
        self.apply_confirmed(&message);
        Ok(message)
    }

    pub async fn pin_message(&mut self, message_id: &MessageId, pinned: bool) -> Result<Message> {
        let message = self.sender.pin(message_id, pinned).await?;
        self.apply_update(&message);
        Ok(message)
    }

    pub async fn mark_read(&mut self, message_id: &MessageId) -> Result<Message> {
        let message = self.sender.mark_read(message_id).await?;
        self.apply_update(&message);
        Ok(message)
    }

    fn apply_confirmed(&mut self, message: &Message) {
        if self.active.as_ref() == Some(&message.conversation_id) {
            self.messages.insert(message.clone());
        }
        self.store
            .patch_latest_message(&message.conversation_id, message);
    }

    fn apply_update(&mut self, message: &Message) {
        self.messages.update(message.clone());
        let is_snapshot = self
            .store
            .get(&message.conversation_id)
            .and_then(|c| c.latest_message.as_ref())
            .map(|latest| latest.id == message.id)
            .unwrap_or(false);
        if is_snapshot {
            self.store
                .patch_latest_message(&message.conversation_id, message);
        }
    }

    /// Apply a pushed message. Messages for conversations that are not in
    /// the store are logged and dropped.
    pub fn apply_incoming(&mut self, message: Message) -> Option<HubEvent> {
        let conversation_id = message.conversation_id.clone();
        if !self.store.contains(&conversation_id) {
            log::warn!(
                "Push for unknown conversation {}; store left unchanged",
                conversation_id
            );
            return None;
        }

        let patched = self.store.patch_latest_message(&conversation_id, &message);
        if self.active.as_ref() == Some(&conversation_id) {
            if let InsertOutcome::Inserted(_) = self.messages.insert(message.clone()) {
                return Some(HubEvent::MessageAppended {
                    conversation_id,
                    message,
                });
            }
            return None;
        }
        patched.then_some(HubEvent::SnapshotUpdated { conversation_id })
    }

    /// Wait for the next change coming from the push channel. Duplicates of
    /// messages already shown produce no event.
    pub async fn next_event(&mut self) -> Option<HubEvent> {
        loop {
            let delivery = self.subscriber.next_delivery().await?;
            match delivery.kind {
                DeliveryKind::Message(message) => {
                    if message.conversation_id != delivery.conversation_id {
                        log::warn!(
                            "Subscription for {} delivered message {} of {}",
                            delivery.conversation_id,
                            message.id,
                            message.conversation_id
                        );
                        continue;
                    }
                    if let Some(event) = self.apply_incoming(message) {
                        return Some(event);
                    }
                }
                DeliveryKind::Malformed(reason) => {
                    log::warn!(
                        "Dropping malformed message for {}: {}",
                        delivery.conversation_id,
                        reason
                    );
                }
                DeliveryKind::Closed(reason) => {
                    return Some(self.handle_closed(delivery.conversation_id, reason).await);
                }
            }
        }
    }

    async fn handle_closed(&mut self, conversation_id: ConversationId, reason: String) -> HubEvent {
        let still_open = self.active.as_ref() == Some(&conversation_id);
        if still_open && self.resubscribe_on_error {
            match self.subscriber.subscribe(&conversation_id).await {
                Ok(()) => {
                    log::info!("Re-opened subscription to {}", conversation_id);
                    return HubEvent::Resubscribed { conversation_id };
                }
                Err(e) => log::warn!("Re-opening {} failed: {}", conversation_id, e),
            }
        }
        HubEvent::SubscriptionClosed {
            conversation_id,
            reason,
        }
    }

    pub async fn create_conversation(
        &mut self,
        participants: &[UserId],
        is_group: bool,
        name: Option<&str>,
    ) -> Result<Conversation> {
        self.store
            .create_conversation(participants, is_group, name)
            .await
    }

    pub async fn add_participant(
        &mut self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Conversation> {
        self.store.add_participant(conversation_id, user_id).await
    }

    pub async fn leave_conversation(&mut self, conversation_id: &ConversationId) -> Result<()> {
        self.store.leave_conversation(conversation_id).await?;
        if self.active.as_ref() == Some(conversation_id) {
            self.close_conversation();
        }
        Ok(())
    }

    /// Drop every subscription
    pub fn shutdown(&mut self) {
        self.subscriber.unsubscribe_all();
        self.active = None;
        self.messages.clear();
    }
}
