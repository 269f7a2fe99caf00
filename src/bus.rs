use crate::chat::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A message was appended to a conversation
    MessageAppended {
        conversation_id: i64,
        message: Message,
    },

    /// A different conversation became active
    ConversationChanged { conversation_id: i64 },

    /// Conversations were added, removed or renamed
    HistoryChanged,

    /// The assistant is composing a reply
    Typing(bool),

    /// The correction service is being consulted
    SpellChecking(bool),
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}
