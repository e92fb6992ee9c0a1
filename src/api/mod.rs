pub mod rest;

use async_trait::async_trait;

use crate::common::{ChatMessage, UserId};

pub use rest::RestClient;

/// One-shot history lookup for a conversation.
///
/// Implementations report failures by returning an empty list so that the
/// conversation can carry on with live messages only.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn chat_history(&self, peer: UserId) -> Vec<ChatMessage>;
}
