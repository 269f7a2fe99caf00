use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_TITLE: &str = "New Conversation";
pub const GREETING: &str = "Hello! I'm your AI assistant. How can I help you today?";
pub const GREETING_ID: i64 = 1;

pub const CHAT_FALLBACK: &str = "Sorry, I encountered an error. Please try again.";
pub const CHAT_APOLOGY: &str =
    "Sorry, I'm having trouble connecting right now. Please try again later.";
pub const SEARCH_FALLBACK: &str = "Search completed, but no results found.";
pub const SEARCH_APOLOGY: &str = "Sorry, I encountered an error while searching. Please try again.";
pub const SPEECH_APOLOGY: &str =
    "Sorry, I had trouble hearing you. Please try again or type your message.";

const TITLE_MAX_CHARS: usize = 50;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    System,
}

/// What a message is about. Server-supplied labels we don't know land in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    Greeting,
    SpellCorrection,
    SearchResult,
    Error,
    Unknown,
    Other(String),
}

impl Intent {
    pub fn as_str(&self) -> &str {
        match self {
            Intent::Greeting => "greeting",
            Intent::SpellCorrection => "spell_correction",
            Intent::SearchResult => "search_result",
            Intent::Error => "error",
            Intent::Unknown => "unknown",
            Intent::Other(label) => label,
        }
    }
}

impl From<String> for Intent {
    fn from(label: String) -> Self {
        match label.as_str() {
            "greeting" => Intent::Greeting,
            "spell_correction" => Intent::SpellCorrection,
            "search_result" => Intent::SearchResult,
            "error" => Intent::Error,
            "unknown" => Intent::Unknown,
            _ => Intent::Other(label),
        }
    }
}

impl From<Intent> for String {
    fn from(intent: Intent) -> Self {
        intent.as_str().to_string()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which search backend a query goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    General,
    /// External web search engine.
    Google,
    /// Curated knowledge base.
    Knowledge,
}

impl SearchMode {
    pub fn endpoint(&self) -> &'static str {
        match self {
            SearchMode::General => "/api/search",
            SearchMode::Google => "/api/search/google",
            SearchMode::Knowledge => "/api/search/knowledge",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchMode::General => "Enhanced Search",
            SearchMode::Google => "Google Search",
            SearchMode::Knowledge => "Knowledge Base Search",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "general" => Some(SearchMode::General),
            "google" | "web" => Some(SearchMode::Google),
            "knowledge" | "kb" => Some(SearchMode::Knowledge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_type: Option<SearchMode>,
}

impl Message {
    pub fn new(id: i64, sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
            timestamp: Utc::now(),
            intent: None,
            search_type: None,
        }
    }

    pub fn user(id: i64, text: impl Into<String>) -> Self {
        Self::new(id, Sender::User, text)
    }

    pub fn bot(id: i64, text: impl Into<String>, intent: Intent) -> Self {
        Self::new(id, Sender::Bot, text).with_intent(intent)
    }

    pub fn system(id: i64, text: impl Into<String>, intent: Intent) -> Self {
        Self::new(id, Sender::System, text).with_intent(intent)
    }

    pub fn greeting() -> Self {
        Self::bot(GREETING_ID, GREETING, Intent::Greeting)
    }

    pub fn spell_correction(id: i64, before: &str, after: &str) -> Self {
        Self::system(
            id,
            format!("✓ Spell check applied: \"{}\" → \"{}\"", before, after),
            Intent::SpellCorrection,
        )
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_search_type(mut self, mode: SearchMode) -> Self {
        self.search_type = Some(mode);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// A conversation holding only the greeting.
    pub fn new(id: i64) -> Self {
        let mut conversation = Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            last_message: String::new(),
            timestamp: Utc::now(),
            message_count: 0,
            messages: vec![Message::greeting()],
        };
        conversation.refresh_summary();
        conversation
    }

    /// Recompute `last_message`, `timestamp` and `message_count` from `messages`.
    pub fn refresh_summary(&mut self) {
        self.message_count = self.messages.len();
        if let Some(last) = self.messages.last() {
            self.last_message = last.text.clone();
            self.timestamp = last.timestamp;
        }
    }

    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| m.sender == Sender::User)
    }

    pub fn next_message_id(&self) -> i64 {
        let latest = self.messages.iter().map(|m| m.id).max().unwrap_or(0);
        next_id_after(latest)
    }

    pub fn matches(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self.last_message.to_lowercase().contains(needle_lower)
    }
}

/// Millisecond clock value, bumped past `latest` so ids never repeat.
pub fn next_id_after(latest: i64) -> i64 {
    Utc::now().timestamp_millis().max(latest + 1)
}

/// Title for a conversation named after its first user message.
pub fn derive_title(text: &str) -> String {
    if text.chars().count() <= TITLE_MAX_CHARS {
        return text.to_string();
    }
    let keep = TITLE_MAX_CHARS - ELLIPSIS.len();
    let mut title: String = text.chars().take(keep).collect();
    title.push_str(ELLIPSIS);
    title
}
