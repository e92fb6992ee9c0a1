use std::sync::Arc;

use crate::api::HistoryFetcher;
use crate::common::{ChatMessage, UserId};

use super::reconcile::reconcile;

/// One open chat between the local user and a peer.
///
/// Holds the history snapshot taken when the conversation was opened; the
/// displayed list is recomputed from it and whatever live snapshot the
/// caller passes in.
#[derive(Debug, Clone)]
pub struct Conversation {
    local: UserId,
    peer: UserId,
    history: Arc<[ChatMessage]>,
}

impl Conversation {
    /// Fetches history once. A failed fetch yields an empty history.
    pub async fn open(fetcher: &dyn HistoryFetcher, local: UserId, peer: UserId) -> Self {
        let history = fetcher.chat_history(peer).await;
        log::info!(
            "Loaded {} history messages for conversation {local}<->{peer}",
            history.len()
        );
        Self::with_history(local, peer, history)
    }

    pub fn with_history(local: UserId, peer: UserId, history: Vec<ChatMessage>) -> Self {
        Self {
            local,
            peer,
            history: history.into(),
        }
    }

    pub fn local(&self) -> UserId {
        self.local
    }

    pub fn peer(&self) -> UserId {
        self.peer
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn view(&self, live: &[ChatMessage]) -> Vec<ChatMessage> {
        reconcile(&self.history, live, self.local, self.peer)
    }
}
