use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::Intent;

// Request bodies

#[derive(Debug, Serialize)]
pub struct SpellCheckRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
}

// Response bodies

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpellCheckReply {
    pub corrected_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatReply {
    pub response: Option<String>,
    pub intent: Option<Intent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchReply {
    pub response: Option<String>,
    /// Free-form; some backends send a string, others a list of hits.
    pub results: Option<Value>,
}

impl SearchReply {
    /// Displayable text, preferring `response` over `results`.
    pub fn text(&self) -> Option<String> {
        if let Some(response) = self.response.as_ref().filter(|r| !r.is_empty()) {
            return Some(response.clone());
        }
        match self.results.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => serde_json::to_string_pretty(other).ok(),
        }
    }
}
