use std::collections::HashSet;

use crate::common::{ChatMessage, UserId};

/// Merges history and the live buffer into what one conversation displays.
///
/// Only messages between `local` and `peer` survive. History is walked
/// before live messages and the first copy wins, where two messages are the
/// same if they share a defined `id` or the exact `(timestamp, content)`
/// pair. The result is stably sorted by time; a missing timestamp sorts first.
pub fn reconcile(
    history: &[ChatMessage],
    live: &[ChatMessage],
    local: UserId,
    peer: UserId,
) -> Vec<ChatMessage> {
    let mut seen_ids: HashSet<i64> = HashSet::new();
    let mut seen_stamps: HashSet<(Option<&str>, &str)> = HashSet::new();
    let mut kept = Vec::new();

    for message in history.iter().chain(live) {
        if !message.belongs_to(local, peer) {
            continue;
        }
        if message.id.is_some_and(|id| seen_ids.contains(&id)) {
            continue;
        }
        let stamp = (message.timestamp.as_deref(), message.content.as_str());
        if seen_stamps.contains(&stamp) {
            continue;
        }
        if let Some(id) = message.id {
            seen_ids.insert(id);
        }
        seen_stamps.insert(stamp);
        kept.push((message.sent_at(), message));
    }

    kept.sort_by_key(|(sent_at, _)| *sent_at);
    kept.into_iter().map(|(_, message)| message.clone()).collect()
}
