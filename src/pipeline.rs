//! Turns submitted text into a user message and a bot reply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::api::ChatBackend;
use crate::bus::{Event, EventBus};
use crate::chat::{
    Intent, Message, SearchMode, CHAT_APOLOGY, CHAT_FALLBACK, SEARCH_APOLOGY, SEARCH_FALLBACK,
};
use crate::config::Config;
use crate::session::ConversationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Chat,
    Search(SearchMode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Nothing to send.
    Ignored,
    /// Another submission is still waiting for its reply.
    Busy,
    Completed {
        user: Message,
        /// `None` when the conversation was deleted before the reply arrived.
        reply: Option<Message>,
    },
}

pub struct MessagePipeline {
    session: Arc<Mutex<ConversationStore>>,
    backend: Arc<dyn ChatBackend>,
    bus: Arc<EventBus>,
    config: Config,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however `submit` exits.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MessagePipeline {
    pub fn new(
        session: Arc<Mutex<ConversationStore>>,
        backend: Arc<dyn ChatBackend>,
        bus: Arc<EventBus>,
        config: Config,
    ) -> Self {
        Self {
            session,
            backend,
            bus,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn submit(&self, text: &str, dispatch: Dispatch) -> Submission {
        let input = text.trim();
        if input.is_empty() {
            return Submission::Ignored;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Submission rejected, a reply is still pending");
            return Submission::Busy;
        }
        let _guard = InFlight(&self.in_flight);

        let Some(conversation_id) = self.session.lock().await.active_id() else {
            warn!("No active conversation, dropping submission");
            return Submission::Ignored;
        };

        let text = self.corrected(conversation_id, input).await;

        let mut user = {
            let session = self.session.lock().await;
            Message::user(session.next_message_id(conversation_id), text.clone())
        };
        if let Dispatch::Search(mode) = dispatch {
            user = user.with_search_type(mode);
        }
        let Some(user) = self.session.lock().await.append_to(conversation_id, user).await else {
            warn!(conversation_id, "Conversation vanished before the user message was stored");
            return Submission::Ignored;
        };

        self.bus.publish(Event::Typing(true));
        let (reply_text, intent) = match dispatch {
            Dispatch::Chat => self.chat_reply(&text).await,
            Dispatch::Search(mode) => self.search_reply(&text, mode).await,
        };

        tokio::time::sleep(self.config.reply_delay()).await;

        let reply = {
            let mut session = self.session.lock().await;
            let id = session.next_message_id(conversation_id);
            let mut message = Message::bot(id, reply_text, intent);
            if let Dispatch::Search(mode) = dispatch {
                message = message.with_search_type(mode);
            }
            session.append_to(conversation_id, message).await
        };
        if reply.is_none() {
            warn!(conversation_id, "Conversation was deleted, dropping reply");
        }
        self.bus.publish(Event::Typing(false));

        Submission::Completed { user, reply }
    }

    /// Run `input` through the correction service, noting any change in the conversation.
    async fn corrected(&self, conversation_id: i64, input: &str) -> String {
        if !self.config.spell_check {
            return input.to_string();
        }

        self.bus.publish(Event::SpellChecking(true));
        let result = self.backend.correct_spelling(input).await;
        self.bus.publish(Event::SpellChecking(false));

        let corrected = match result {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return input.to_string(),
            Err(e) => {
                debug!(error = %e, "Spell check failed, keeping original text");
                return input.to_string();
            }
        };

        if corrected != input {
            {
                let mut session = self.session.lock().await;
                let notice = Message::spell_correction(
                    session.next_message_id(conversation_id),
                    input,
                    &corrected,
                );
                session.append_to(conversation_id, notice).await;
            }
            tokio::time::sleep(self.config.correction_pause).await;
        }
        corrected
    }

    async fn chat_reply(&self, text: &str) -> (String, Intent) {
        match self.backend.chat(text).await {
            Ok(reply) => (
                reply
                    .response
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| CHAT_FALLBACK.to_string()),
                reply
                    .intent
                    .filter(|i| !i.as_str().is_empty())
                    .unwrap_or(Intent::Unknown),
            ),
            Err(e) => {
                error!(error = %e, server_error = e.is_server_error(), "Error sending message");
                (CHAT_APOLOGY.to_string(), Intent::Error)
            }
        }
    }

    async fn search_reply(&self, query: &str, mode: SearchMode) -> (String, Intent) {
        match self.backend.search(query, mode).await {
            Ok(reply) => (
                reply.text().unwrap_or_else(|| SEARCH_FALLBACK.to_string()),
                Intent::SearchResult,
            ),
            Err(e) => {
                error!(error = %e, search = mode.label(), "Search error");
                (SEARCH_APOLOGY.to_string(), Intent::Error)
            }
        }
    }
}
