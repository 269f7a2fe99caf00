//! Conversation history and the active conversation.
//!
//! All mutation goes through [`ConversationStore`]. Every mutating call writes
//! the affected records through [`Store`] before returning, so a restart picks
//! up exactly where the last operation left off.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus};
use crate::chat::{derive_title, next_id_after, Conversation, Message, Sender, DEFAULT_TITLE};
use crate::store::{Store, CURRENT_ID_KEY, HISTORY_KEY, MESSAGES_KEY};

pub struct ConversationStore {
    store: Store,
    bus: Arc<EventBus>,
    history: Vec<Conversation>,
    active_id: Option<i64>,
}

impl ConversationStore {
    /// Restore persisted state, creating a default conversation on first run.
    pub async fn initialize(store: Store, bus: Arc<EventBus>) -> Self {
        let mut history: Vec<Conversation> = store.load(HISTORY_KEY, Vec::new()).await;
        let saved_id: Option<i64> = store.load(CURRENT_ID_KEY, None).await;
        let saved_messages: Vec<Message> = store.load(MESSAGES_KEY, Vec::new()).await;

        let mut repaired = false;
        for conversation in &mut history {
            if conversation.messages.is_empty() {
                conversation.messages.push(Message::greeting());
                repaired = true;
            }
            conversation.refresh_summary();
        }

        let mut this = Self {
            store,
            bus,
            history,
            active_id: None,
        };

        if this.history.is_empty() {
            let conversation = Conversation::new(next_id_after(0));
            info!(conversation_id = conversation.id, "No saved history, starting fresh");
            this.active_id = Some(conversation.id);
            this.history.push(conversation);
            this.persist_all().await;
            return this;
        }

        match saved_id.and_then(|id| this.position(id)) {
            Some(index) if !saved_messages.is_empty() => {
                let conversation = &mut this.history[index];
                conversation.messages = saved_messages;
                conversation.refresh_summary();
                this.active_id = Some(conversation.id);
            }
            _ => {
                this.active_id = Some(this.history[0].id);
                this.persist_active().await;
            }
        }
        if repaired {
            this.store.save(HISTORY_KEY, &this.history).await;
        }

        info!(
            conversations = this.history.len(),
            active = ?this.active_id,
            "Restored conversation history"
        );
        this
    }

    pub fn history(&self) -> &[Conversation] {
        &self.history
    }

    pub fn active_id(&self) -> Option<i64> {
        self.active_id
    }

    pub fn get(&self, id: i64) -> Option<&Conversation> {
        self.history.iter().find(|c| c.id == id)
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active_id.and_then(|id| self.get(id))
    }

    pub fn messages(&self) -> &[Message] {
        self.active().map(|c| c.messages.as_slice()).unwrap_or(&[])
    }

    /// Id the next message in `conversation_id` would get.
    pub fn next_message_id(&self, conversation_id: i64) -> i64 {
        self.get(conversation_id)
            .map(Conversation::next_message_id)
            .unwrap_or_else(|| next_id_after(0))
    }

    pub async fn start_new(&mut self) -> i64 {
        let latest = self.history.iter().map(|c| c.id).max().unwrap_or(0);
        let conversation = Conversation::new(next_id_after(latest));
        let id = conversation.id;

        self.history.insert(0, conversation);
        self.active_id = Some(id);
        self.persist_all().await;

        debug!(conversation_id = id, "Started new conversation");
        self.bus.publish(Event::HistoryChanged);
        self.bus.publish(Event::ConversationChanged { conversation_id: id });
        id
    }

    pub async fn switch_to(&mut self, id: i64) -> bool {
        if self.position(id).is_none() {
            warn!(conversation_id = id, "Cannot switch to unknown conversation");
            return false;
        }

        self.active_id = Some(id);
        self.persist_active().await;
        self.bus.publish(Event::ConversationChanged { conversation_id: id });
        true
    }

    pub async fn delete_by_id(&mut self, id: i64) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };

        self.history.remove(index);
        self.store.save(HISTORY_KEY, &self.history).await;
        self.bus.publish(Event::HistoryChanged);
        debug!(conversation_id = id, "Deleted conversation");

        if self.active_id == Some(id) {
            match self.history.first().map(|c| c.id) {
                Some(next) => {
                    self.active_id = Some(next);
                    self.persist_active().await;
                    self.bus.publish(Event::ConversationChanged { conversation_id: next });
                }
                None => {
                    self.start_new().await;
                }
            }
        }
        true
    }

    /// Append to the active conversation.
    pub async fn append_message(&mut self, message: Message) -> Option<Message> {
        let id = self.active_id?;
        self.append_to(id, message).await
    }

    /// Append to a specific conversation, which need not be the active one.
    ///
    /// Returns the stored message, or `None` if the conversation is gone.
    pub async fn append_to(&mut self, conversation_id: i64, mut message: Message) -> Option<Message> {
        let index = self.position(conversation_id)?;
        let conversation = &mut self.history[index];

        let floor = conversation.messages.last().map(|m| m.id).unwrap_or(0);
        if message.id <= floor {
            message.id = floor + 1;
        }

        let renamed = message.sender == Sender::User
            && conversation.title == DEFAULT_TITLE
            && !conversation.has_user_message();
        if renamed {
            conversation.title = derive_title(&message.text);
        }

        conversation.messages.push(message.clone());
        conversation.refresh_summary();

        self.store.save(HISTORY_KEY, &self.history).await;
        if self.active_id == Some(conversation_id) {
            self.store.save(MESSAGES_KEY, self.messages()).await;
        }

        self.bus.publish(Event::MessageAppended {
            conversation_id,
            message: message.clone(),
        });
        if renamed {
            self.bus.publish(Event::HistoryChanged);
        }
        Some(message)
    }

    /// Conversations whose title or last message contains `query`, ignoring case.
    pub fn filter(&self, query: &str) -> Vec<&Conversation> {
        let needle = query.to_lowercase();
        self.history.iter().filter(|c| c.matches(&needle)).collect()
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.history.iter().position(|c| c.id == id)
    }

    async fn persist_active(&self) {
        if let Some(id) = self.active_id {
            self.store.save(CURRENT_ID_KEY, &id).await;
        }
        self.store.save(MESSAGES_KEY, self.messages()).await;
    }

    async fn persist_all(&self) {
        self.store.save(HISTORY_KEY, &self.history).await;
        self.persist_active().await;
    }
}

#[cfg(test)]
pub(crate) async fn test_session() -> (tempfile::TempDir, ConversationStore) {
    let (dir, store) = crate::store::test_store().await;
    let session = ConversationStore::initialize(store, Arc::new(EventBus::new())).await;
    (dir, session)
}
