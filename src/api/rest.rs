use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::auth::TokenProvider;
use crate::common::{ChatMessage, UserId};

use super::HistoryFetcher;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("not signed in")]
    NoToken,
    #[error("invalid api base url `{0}`")]
    InvalidBaseUrl(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Authenticated client for the backend's REST chat endpoint.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl RestClient {
    pub fn new(base_url: Url, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            tokens,
        }
    }

    fn history_url(&self, peer: UserId) -> Result<Url, HistoryError> {
        let peer = peer.to_string();
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HistoryError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "messages", peer.as_str()]);
        Ok(url)
    }

    /// `GET /api/messages/{peer}`. Entries that fail strict decoding are
    /// dropped individually.
    pub async fn fetch_history(&self, peer: UserId) -> Result<Vec<ChatMessage>, HistoryError> {
        let token = self.tokens.bearer_token().await.ok_or(HistoryError::NoToken)?;
        let url = self.history_url(peer)?;

        let entries: Vec<serde_json::Value> = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match ChatMessage::from_value(entry) {
                Ok(message) => Some(message),
                Err(err) => {
                    log::warn!("Skipping history entry: {err}");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl HistoryFetcher for RestClient {
    async fn chat_history(&self, peer: UserId) -> Vec<ChatMessage> {
        match self.fetch_history(peer).await {
            Ok(history) => history,
            Err(err) => {
                log::error!("Error fetching chat history with {peer}: {err}");
                Vec::new()
            }
        }
    }
}
