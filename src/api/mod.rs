pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::chat::SearchMode;
pub use client::HttpBackend;
pub use types::{ChatReply, SearchReply};

/// The remote assistant service.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Spell-corrected version of `text`.
    async fn correct_spelling(&self, text: &str) -> Result<String, ApiError>;

    async fn chat(&self, message: &str) -> Result<ChatReply, ApiError>;

    async fn search(&self, query: &str, mode: SearchMode) -> Result<SearchReply, ApiError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server answered with status {status}")]
    Status { status: u16 },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Server-side failures, as opposed to the request never completing.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ApiError::Status { status } if *status >= 500)
    }
}
