use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::common::{ChatMessage, MAX_CONTENT_CHARS, UserId};

use super::stomp::Frame;

/// Application send address shared by every user; the broker fans out by
/// the payload's `recipientId`.
pub const SEND_DESTINATION: &str = "/app/chat.sendMessage";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("not connected")]
    Disconnected,
    #[error("no local user")]
    UnknownUser,
    #[error("message is empty")]
    EmptyContent,
    #[error("message exceeds {} characters", MAX_CONTENT_CHARS)]
    TooLong,
    #[error("connection is shut down")]
    Closed,
    #[error("outbound queue is full")]
    Busy,
}

/// Checks the send preconditions and stamps the outgoing message.
pub fn prepare_outgoing(
    local_user: Option<UserId>,
    connected: bool,
    recipient: UserId,
    content: &str,
    now: DateTime<Utc>,
) -> Result<ChatMessage, SendError> {
    let sender = local_user.ok_or(SendError::UnknownUser)?;
    if !connected {
        return Err(SendError::Disconnected);
    }
    let content = content.trim();
    if content.is_empty() {
        return Err(SendError::EmptyContent);
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(SendError::TooLong);
    }
    Ok(ChatMessage::outgoing(sender, recipient, content, now))
}

pub fn send_frame(message: &ChatMessage) -> Result<Frame, serde_json::Error> {
    Ok(Frame::new("SEND")
        .header("destination", SEND_DESTINATION)
        .header("content-type", "application/json")
        .with_body(message.encode()?))
}
