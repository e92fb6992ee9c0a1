use crate::common::types::ChatMessage;

/// Events the network task reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected,
    Disconnected,
    MessageReceived(ChatMessage),
}
