use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{
    ChatReply, ChatRequest, SearchReply, SearchRequest, SpellCheckReply, SpellCheckRequest,
};
use super::{ApiError, ChatBackend};
use crate::chat::SearchMode;
use crate::config::Config;

const SPELL_CHECK_PATH: &str = "/api/spell-check";
const CHAT_PATH: &str = "/api/chat";

/// [`ChatBackend`] over HTTP with JSON bodies.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "-> POST");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(%url, status = status.as_u16(), "<- response");
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn correct_spelling(&self, text: &str) -> Result<String, ApiError> {
        let reply: SpellCheckReply = self
            .post(SPELL_CHECK_PATH, &SpellCheckRequest { text })
            .await?;

        Ok(reply
            .corrected_text
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| text.to_string()))
    }

    async fn chat(&self, message: &str) -> Result<ChatReply, ApiError> {
        self.post(CHAT_PATH, &ChatRequest { message }).await
    }

    async fn search(&self, query: &str, mode: SearchMode) -> Result<SearchReply, ApiError> {
        self.post(mode.endpoint(), &SearchRequest { query }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        let config = Config {
            api_base_url: base.to_string(),
            ..Config::default()
        };
        HttpBackend::new(&config).unwrap()
    }

    #[test]
    fn urls_join_without_double_slash() {
        let api = backend("http://localhost:8000/");
        assert_eq!(api.url(CHAT_PATH), "http://localhost:8000/api/chat");
        assert_eq!(
            api.url(SearchMode::Google.endpoint()),
            "http://localhost:8000/api/search/google"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // Grab a free port, then close it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let api = backend(&format!("http://127.0.0.1:{port}"));
        let err = api.chat("hello").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(!err.is_server_error());
    }
}
