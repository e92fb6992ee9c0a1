use uuid::Uuid;

use crate::common::{ChatMessage, UserId};

use super::stomp::Frame;

const PRIVATE_QUEUE_PREFIX: &str = "/user/queue/private-";

/// Inbound address for `user`. Depends on nothing but the id.
pub fn private_queue_for(user: UserId) -> String {
    format!("{PRIVATE_QUEUE_PREFIX}{user}")
}

/// The single per-connection subscription to the local user's private queue.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: String,
    destination: String,
}

impl Subscription {
    pub fn for_user(user: UserId) -> Self {
        Self {
            id: format!("sub-{}", Uuid::new_v4().simple()),
            destination: private_queue_for(user),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn subscribe_frame(&self) -> Frame {
        Frame::new("SUBSCRIBE")
            .header("id", &self.id)
            .header("destination", &self.destination)
            .header("ack", "auto")
    }

    /// Turns a MESSAGE frame addressed to us into a chat message.
    ///
    /// Frames for another subscription or destination, and bodies that fail
    /// strict decoding, are logged and dropped.
    pub fn route(&self, frame: &Frame) -> Option<ChatMessage> {
        if frame.command != "MESSAGE" {
            return None;
        }
        if frame.get("subscription") != Some(self.id.as_str()) {
            log::warn!(
                "Dropping frame for foreign subscription {:?}",
                frame.get("subscription")
            );
            return None;
        }
        if let Some(destination) = frame.get("destination") {
            if destination != self.destination {
                log::warn!("Dropping frame for foreign destination {destination}");
                return None;
            }
        }
        match ChatMessage::decode(&frame.body) {
            Ok(message) => Some(message),
            Err(err) => {
                log::error!("Error parsing message: {err}");
                None
            }
        }
    }
}
